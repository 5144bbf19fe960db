//! Operation audit log persistence trait

use async_trait::async_trait;

use crate::model::{AuditLogFilter, AuditLogRecord, Page};

#[async_trait]
pub trait AuditPersistence: Send + Sync {
    /// Append entries; existing entries are never modified
    async fn audit_append(&self, records: Vec<AuditLogRecord>) -> anyhow::Result<()>;

    /// Paginated search, newest first. `page_no` starts at 1.
    async fn audit_search_page(
        &self,
        gateway_id: i64,
        filter: &AuditLogFilter,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<AuditLogRecord>>;
}
