//! Operation audit log
//!
//! Every mutation writes one entry per resource kind holding the before and
//! after state of each row it touched. Entries are committed in the same
//! transaction as the draft change they describe.

use std::sync::Arc;

use chrono::Utc;
use gantry_common::{OperationType, ResourceKind, ResourceStatus, Result};
use gantry_persistence::{
    AuditLogFilter, AuditLogRecord, AuditPersistence, DraftRow, Page, PersistenceService,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::GatewayContext;

/// State of one row as recorded in `data_before` / `data_after`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperationData {
    pub id: String,
    pub status: ResourceStatus,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl BatchOperationData {
    fn from_row(row: &DraftRow, status: ResourceStatus) -> Self {
        // keep malformed configs verbatim rather than losing them
        let config = serde_json::from_str(&row.config)
            .unwrap_or_else(|_| Value::String(row.config.clone()));
        Self {
            id: row.id.clone(),
            status,
            config,
        }
    }
}

/// Builder for one audit entry
pub struct AuditEntryBuilder {
    gateway_id: i64,
    kind: ResourceKind,
    operation: OperationType,
    operator: String,
    resource_ids: Vec<String>,
    before: Vec<BatchOperationData>,
    after: Vec<BatchOperationData>,
}

impl AuditEntryBuilder {
    pub fn new(ctx: &GatewayContext, kind: ResourceKind, operation: OperationType) -> Self {
        Self {
            gateway_id: ctx.gateway_id(),
            kind,
            operation,
            operator: ctx.operator.clone(),
            resource_ids: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    fn track(&mut self, id: &str) {
        if !self.resource_ids.iter().any(|known| known == id) {
            self.resource_ids.push(id.to_string());
        }
    }

    pub fn before_rows(mut self, rows: &[DraftRow]) -> Self {
        for row in rows {
            self.track(&row.id);
            self.before.push(BatchOperationData::from_row(row, row.status));
        }
        self
    }

    pub fn after_rows(mut self, rows: &[DraftRow]) -> Self {
        for row in rows {
            self.track(&row.id);
            self.after.push(BatchOperationData::from_row(row, row.status));
        }
        self
    }

    /// Records `rows` with their config unchanged but a new status.
    pub fn after_status(mut self, rows: &[DraftRow], status: ResourceStatus) -> Self {
        for row in rows {
            self.track(&row.id);
            self.after.push(BatchOperationData::from_row(row, status));
        }
        self
    }

    /// Records `rows` as physically removed.
    pub fn after_removed(mut self, rows: &[DraftRow]) -> Self {
        for row in rows {
            self.track(&row.id);
            self.after.push(BatchOperationData {
                id: row.id.clone(),
                status: ResourceStatus::Deleted,
                config: Value::Null,
            });
        }
        self
    }

    pub fn build(self) -> Result<AuditLogRecord> {
        Ok(AuditLogRecord {
            id: 0,
            gateway_id: self.gateway_id,
            resource_type: self.kind,
            operation_type: self.operation,
            resource_ids: self.resource_ids.join(","),
            data_before: serde_json::to_string(&self.before)?,
            data_after: serde_json::to_string(&self.after)?,
            operator: self.operator,
            created_at: Utc::now().naive_utc(),
        })
    }
}

/// Read side of the audit log.
#[derive(Clone)]
pub struct AuditLogger {
    persistence: Arc<dyn PersistenceService>,
}

impl AuditLogger {
    pub fn new(persistence: Arc<dyn PersistenceService>) -> Self {
        Self { persistence }
    }

    /// Appends entries outside any draft transaction.
    pub async fn record(&self, entries: Vec<AuditLogRecord>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.persistence.audit_append(entries).await?;
        Ok(())
    }

    /// Newest entries first; `page_no` starts at 1.
    pub async fn search(
        &self,
        gateway_id: i64,
        filter: &AuditLogFilter,
        page_no: u64,
        page_size: u64,
    ) -> Result<Page<AuditLogRecord>> {
        Ok(self
            .persistence
            .audit_search_page(gateway_id, filter, page_no.max(1), page_size)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn test_builder_records_before_and_after() {
        let fx = Fixture::new().await;
        let ctx = fx.context();
        let row = fx.draft_row(ResourceKind::Route, "r1", r#"{"uri":"/a"}"#, ResourceStatus::Success);

        let entry = AuditEntryBuilder::new(&ctx, ResourceKind::Route, OperationType::Delete)
            .before_rows(std::slice::from_ref(&row))
            .after_status(std::slice::from_ref(&row), ResourceStatus::DeleteDraft)
            .build()
            .unwrap();

        assert_eq!(entry.resource_ids, "r1");
        assert_eq!(entry.operator, "admin");
        let before: Vec<BatchOperationData> = serde_json::from_str(&entry.data_before).unwrap();
        let after: Vec<BatchOperationData> = serde_json::from_str(&entry.data_after).unwrap();
        assert_eq!(before[0].status, ResourceStatus::Success);
        assert_eq!(after[0].status, ResourceStatus::DeleteDraft);
        assert_eq!(after[0].config["uri"], "/a");
    }

    #[tokio::test]
    async fn test_removed_rows_have_no_config() {
        let fx = Fixture::new().await;
        let row = fx.draft_row(ResourceKind::Route, "r1", "{}", ResourceStatus::DeleteDraft);
        let entry = AuditEntryBuilder::new(&fx.context(), ResourceKind::Route, OperationType::Publish)
            .before_rows(std::slice::from_ref(&row))
            .after_removed(std::slice::from_ref(&row))
            .build()
            .unwrap();
        assert_eq!(entry.data_after, r#"[{"id":"r1","status":"deleted"}]"#);
    }

    #[tokio::test]
    async fn test_search_newest_first() {
        let fx = Fixture::new().await;
        let ctx = fx.context();
        let logger = AuditLogger::new(fx.persistence.clone());
        let mut entries = Vec::new();
        for (id, op) in [("r1", OperationType::Create), ("r2", OperationType::Update)] {
            let row = fx.draft_row(ResourceKind::Route, id, "{}", ResourceStatus::CreateDraft);
            entries.push(
                AuditEntryBuilder::new(&ctx, ResourceKind::Route, op)
                    .after_rows(&[row])
                    .build()
                    .unwrap(),
            );
        }
        logger.record(entries).await.unwrap();

        let page = logger
            .search(ctx.gateway_id(), &AuditLogFilter::default(), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.page_items[0].resource_ids, "r2");

        let filter = AuditLogFilter {
            resource_id: Some("r1".to_string()),
            ..Default::default()
        };
        let page = logger.search(ctx.gateway_id(), &filter, 1, 10).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.page_items[0].operation_type, OperationType::Create);
    }
}
