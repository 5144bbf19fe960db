//! Gantry Persistence - Database entities and persistence layer
//!
//! This crate provides:
//! - SeaORM entity definitions for gateways, synced snapshots and audit logs
//! - Per-kind draft tables accessed through dynamic queries
//! - Persistence trait abstractions for unified storage
//! - An in-memory backend with the same transactional contract

pub mod entity;
pub mod memory;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export persistence traits
pub use traits::{
    AuditPersistence, GatewayPersistence, PersistenceService, ResourcePersistence,
    SyncDataPersistence,
};

// Re-export backends
pub use memory::MemoryPersistService;
pub use sql::ExternalDbPersistService;

// Re-export model types
pub use model::{
    AuditLogFilter, AuditLogRecord, DraftChangeSet, DraftFilter, DraftRow, Page, StatusUpdate,
    StorageMode, SyncChangeSet, SyncDataRow,
};
