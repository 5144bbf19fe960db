//! Reverting unpublished edits
//!
//! A revert rewinds drafts to what etcd currently serves, read live from etcd
//! rather than from the snapshot table. Pending deletes are rewound the same
//! way as pending updates. Etcd itself is never written.

use std::collections::HashMap;

use chrono::Utc;
use gantry_common::{GantryError, OperationType, ResourceKind, Result};
use gantry_persistence::{DraftChangeSet, DraftRow, ResourcePersistence};
use tracing::info;

use crate::audit::AuditEntryBuilder;
use crate::draft::load_exact;
use crate::reconcile::SyncedResource;
use crate::registry::capability;
use crate::service::GatewayScope;
use crate::status::{StatusMachine, ensure_all};

pub struct RevertEngine<'a> {
    scope: &'a GatewayScope,
}

impl<'a> RevertEngine<'a> {
    pub(crate) fn new(scope: &'a GatewayScope) -> Self {
        Self { scope }
    }

    pub async fn revert(&self, kind: ResourceKind, ids: &[String]) -> Result<Vec<DraftRow>> {
        let ctx = &self.scope.ctx;
        ctx.gateway.ensure_writable()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let gateway_id = ctx.gateway_id();
        let rows = load_exact(self.scope.persistence.as_ref(), gateway_id, kind, ids).await?;
        ensure_all(&rows, OperationType::Revert)?;

        let mut live: HashMap<String, SyncedResource> = self
            .scope
            .reconciler()
            .fetch(&ctx.gateway.resource_prefix(kind))
            .await?
            .into_iter()
            .filter(|record| record.kind == kind)
            .map(|record| (record.id.clone(), record))
            .collect();
        let missing: Vec<String> = rows
            .iter()
            .filter(|row| !live.contains_key(&row.id))
            .map(|row| row.id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(GantryError::NoSyncedSnapshot { kind, ids: missing });
        }

        let now = Utc::now().naive_utc();
        let cap = capability(kind);
        let mut changes = DraftChangeSet::default();
        let mut reverted = Vec::with_capacity(rows.len());
        for row in &rows {
            let status = StatusMachine::for_row(row).next_status(OperationType::Revert)?;
            let Some(record) = live.remove(&row.id) else {
                continue;
            };
            // Pending deletes may also hold an unpublished edit.
            let mut updated = row.clone();
            cap.refresh_row(&mut updated, &record.document()?)?;
            updated.name = record.name;
            updated.status = status;
            updated.operation_type = Some(OperationType::Revert);
            updated.updater = ctx.operator.clone();
            updated.updated_at = now;
            changes.updates.push(updated.clone());
            reverted.push(updated);
        }

        changes.audit_logs.push(
            AuditEntryBuilder::new(ctx, kind, OperationType::Revert)
                .before_rows(&rows)
                .after_rows(&reverted)
                .build()?,
        );
        self.scope
            .persistence
            .resource_apply(gateway_id, kind, changes)
            .await?;

        info!(
            gateway = %ctx.gateway.name,
            %kind,
            operator = %ctx.operator,
            count = reverted.len(),
            "Reverted resources"
        );
        Ok(reverted)
    }
}
