use std::sync::Arc;

use async_trait::async_trait;
use gantry_common::{GatewayInfo, Result};

/// One key as observed in etcd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub mod_revision: i64,
}

/// Access to a gateway's etcd keyspace.
///
/// Keys are absolute. Batch writes are transactional per chunk of
/// [`crate::TXN_MAX_OPS`] operations.
#[async_trait]
pub trait EtcdStore: Send + Sync {
    /// Every key under `prefix`, skipping directory placeholders.
    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    async fn batch_put(&self, entries: &[(String, String)]) -> Result<()>;

    async fn batch_delete(&self, keys: &[String]) -> Result<()>;
}

/// Opens the store a gateway's etcd settings point at.
#[async_trait]
pub trait EtcdConnector: Send + Sync {
    async fn connect(&self, gateway: &GatewayInfo) -> Result<Arc<dyn EtcdStore>>;
}
