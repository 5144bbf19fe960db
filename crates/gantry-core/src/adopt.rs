//! One-click adoption
//!
//! Imports resources that exist in etcd but were never edited here into the
//! draft tables, already published.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::Utc;
use gantry_common::{GantryError, OperationType, ResourceKind, Result};
use gantry_persistence::{
    DraftChangeSet, DraftFilter, DraftRow, ResourcePersistence, SyncDataPersistence, SyncDataRow,
};
use tracing::{info, warn};

use crate::audit::AuditEntryBuilder;
use crate::document::ResourceDocument;
use crate::publish::PUT_ORDER;
use crate::reconcile::fallback_name;
use crate::registry::capability;
use crate::service::GatewayScope;
use crate::status::StatusMachine;

/// Kinds adopting more rows than this are imported without an audit entry.
const AUDIT_LIMIT: usize = 100;

pub struct Adopter<'a> {
    scope: &'a GatewayScope,
}

impl<'a> Adopter<'a> {
    pub(crate) fn new(scope: &'a GatewayScope) -> Self {
        Self { scope }
    }

    /// Adopts the snapshot rows with the given IDs (every row when `ids` is
    /// empty) plus whatever they reference. Returns adopted counts per kind.
    pub async fn adopt_synced_resources(
        &self,
        ids: &[String],
    ) -> Result<BTreeMap<ResourceKind, usize>> {
        let ctx = &self.scope.ctx;
        ctx.gateway.ensure_writable()?;
        let gateway_id = ctx.gateway_id();

        let snapshot = self.scope.persistence.sync_data_find_all(gateway_id, None).await?;
        let by_key: HashMap<(ResourceKind, &str), &SyncDataRow> = snapshot
            .iter()
            .map(|row| ((row.kind, row.id.as_str()), row))
            .collect();

        let mut drafts: HashMap<ResourceKind, Vec<DraftRow>> = HashMap::new();
        for kind in ResourceKind::ALL {
            let rows = self
                .scope
                .persistence
                .resource_find(gateway_id, kind, &DraftFilter::all())
                .await?;
            drafts.insert(kind, rows);
        }
        let draft_exists = |kind: ResourceKind, id: &str| {
            drafts
                .get(&kind)
                .is_some_and(|rows| rows.iter().any(|row| row.id == id))
        };

        let mut queue: VecDeque<&SyncDataRow> = snapshot
            .iter()
            .filter(|row| ids.is_empty() || ids.contains(&row.id))
            .collect();
        let mut selected: BTreeMap<ResourceKind, Vec<(&SyncDataRow, ResourceDocument)>> =
            BTreeMap::new();
        let mut visited: Vec<(ResourceKind, &str)> = Vec::new();
        while let Some(row) = queue.pop_front() {
            if visited.contains(&(row.kind, row.id.as_str())) {
                continue;
            }
            visited.push((row.kind, row.id.as_str()));
            let doc = ResourceDocument::parse(&row.config)?;

            for (target, target_id) in capability(row.kind).associated_ids(&doc) {
                match by_key.get(&(target, target_id.as_str())) {
                    Some(referenced) => queue.push_back(*referenced),
                    None if draft_exists(target, &target_id) => {}
                    None => {
                        return Err(GantryError::Dependency {
                            kind: target,
                            ids: vec![target_id],
                            reason: format!(
                                "referenced by {} {} but neither synced nor managed",
                                row.kind, row.id
                            ),
                        });
                    }
                }
            }
            if draft_exists(row.kind, &row.id) {
                continue;
            }
            selected.entry(row.kind).or_default().push((row, doc));
        }

        let now = Utc::now().naive_utc();
        let mut adopted = BTreeMap::new();
        for kind in PUT_ORDER {
            let Some(items) = selected.remove(&kind) else {
                continue;
            };
            let cap = capability(kind);
            let existing = drafts.get(&kind).map(Vec::as_slice).unwrap_or_default();

            let mut rows = Vec::with_capacity(items.len());
            for (synced, doc) in &items {
                let status = StatusMachine::absent(&synced.id)
                    .next_status(OperationType::OneClickManaged)?;
                let mut row =
                    cap.to_draft_row(gateway_id, &synced.id, doc, status, &ctx.operator, now)?;
                if row.name.is_empty() {
                    row.name = fallback_name(kind, &synced.id);
                }
                if existing.iter().any(|draft| draft.name == row.name && draft.id != row.id) {
                    return Err(GantryError::Validation(format!(
                        "{} name '{}' of {} is already used by another resource",
                        kind, row.name, row.id
                    )));
                }
                row.operation_type = Some(OperationType::OneClickManaged);
                rows.push(row);
            }

            let mut changes = DraftChangeSet::default();
            if rows.len() <= AUDIT_LIMIT {
                changes.audit_logs.push(
                    AuditEntryBuilder::new(ctx, kind, OperationType::OneClickManaged)
                        .after_rows(&rows)
                        .build()?,
                );
            } else {
                warn!(%kind, count = rows.len(), "Adopting without audit entry");
            }
            let count = rows.len();
            changes.inserts = rows;
            self.scope
                .persistence
                .resource_apply(gateway_id, kind, changes)
                .await?;
            adopted.insert(kind, count);
        }

        info!(
            gateway = %ctx.gateway.name,
            operator = %ctx.operator,
            adopted = ?adopted,
            "Adopted synced resources"
        );
        Ok(adopted)
    }
}
