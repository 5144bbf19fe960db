//! Gantry etcd - the live keyspace APISIX reads from
//!
//! - [`EtcdStore`]: range-list and transactional batch writes
//! - [`EtcdV3Store`]: backend on a real etcd cluster
//! - [`MemoryEtcdStore`]: in-process backend with etcd-like revisions
//! - [`keys`]: `{prefix}/{segment}/{id}` key layout
//! - [`election`]: per-gateway leader election

pub mod client;
pub mod election;
pub mod keys;
pub mod memory;
pub mod store;

pub use client::{EtcdClientOptions, EtcdV3Connector, EtcdV3Store};
pub use election::{ElectionOptions, EtcdLeaderElector, LeadershipHandle, LeadershipSwitch};
pub use keys::{KeyError, parse_resource_key};
pub use memory::{MemoryEtcdConnector, MemoryEtcdStore};
pub use store::{EtcdConnector, EtcdStore, KeyValue};

/// Maximum operations per etcd transaction.
pub const TXN_MAX_OPS: usize = 100;

/// Values APISIX writes as directory markers; never resources.
pub const PLACEHOLDER_VALUES: [&str; 2] = ["init_dir", "{}"];
