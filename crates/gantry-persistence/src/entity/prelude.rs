pub use super::gateway::Entity as Gateway;
pub use super::gateway_sync_data::Entity as GatewaySyncData;
pub use super::operation_audit_log::Entity as OperationAuditLog;
