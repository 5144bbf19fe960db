//! Persistence traits for the unified storage abstraction layer
//!
//! This module defines the persistence traits that abstract over the storage
//! backends: external database (MySQL/PostgreSQL) and in-memory.

pub mod audit;
pub mod gateway;
pub mod resource;
pub mod sync_data;

pub use audit::AuditPersistence;
pub use gateway::GatewayPersistence;
pub use resource::ResourcePersistence;
pub use sync_data::SyncDataPersistence;

use async_trait::async_trait;

use crate::model::StorageMode;

/// Unified persistence service trait
///
/// This is the main interface for all storage operations used by the control
/// plane.
#[async_trait]
pub trait PersistenceService:
    GatewayPersistence + ResourcePersistence + SyncDataPersistence + AuditPersistence + Send + Sync
{
    /// Get the current storage mode
    fn storage_mode(&self) -> StorageMode;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
