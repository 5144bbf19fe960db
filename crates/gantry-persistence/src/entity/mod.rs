//! SeaORM entities for the fixed tables.
//!
//! Draft tables are one per resource kind with identical columns; they are
//! queried dynamically in [`crate::sql`] instead of through entities.

pub mod prelude;

pub mod gateway;
pub mod gateway_sync_data;
pub mod operation_audit_log;
