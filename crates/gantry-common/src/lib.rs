//! Gantry Common - Shared types for the gateway control plane
//!
//! This crate provides the foundational types used across all Gantry components:
//! - Error taxonomy and error codes
//! - The closed set of APISIX resource kinds and their relations
//! - Resource status and operation enums
//! - APISIX version handling
//! - Gateway descriptor

pub mod error;
pub mod gateway;
pub mod resource;
pub mod status;
pub mod utils;
pub mod version;

// Re-exports for convenience
pub use error::{ErrorCode, GantryError, Result};
pub use gateway::{EtcdConfig, GatewayInfo};
pub use resource::{Relation, ResourceKind};
pub use status::{OperationType, ResourceStatus};
pub use utils::{instance_id, local_ip};
pub use version::ApisixVersion;

/// Default operator recorded when a change has no authenticated user
pub const SYSTEM_OPERATOR: &str = "system";

/// Maximum number of rows bound into a single SQL statement
pub const DB_BATCH_SIZE: usize = 500;
