//! Draft to etcd publishing
//!
//! A publish validates every requested row against the state machine, then
//! writes etcd before touching the draft tables. If the draft update fails
//! after etcd accepted the write, the caller gets a `PartialFailure`; the
//! snapshot re-sync and a later publish both converge from there.

use std::collections::{BTreeMap, HashMap};

use gantry_common::{GantryError, OperationType, ResourceKind, ResourceStatus, Result};
use gantry_persistence::{
    DraftChangeSet, DraftFilter, DraftRow, ResourcePersistence, StatusUpdate,
};
use metrics::counter;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::audit::AuditEntryBuilder;
use crate::draft::load_exact;
use crate::registry::capability;
use crate::service::GatewayScope;
use crate::status::{StatusMachine, ensure_all};

/// Dependencies before dependents, so no chunk of the etcd write lands a
/// reference ahead of its target.
pub const PUT_ORDER: [ResourceKind; 11] = [
    ResourceKind::Ssl,
    ResourceKind::Upstream,
    ResourceKind::Service,
    ResourceKind::PluginConfig,
    ResourceKind::ConsumerGroup,
    ResourceKind::Proto,
    ResourceKind::GlobalRule,
    ResourceKind::PluginMetadata,
    ResourceKind::Consumer,
    ResourceKind::Route,
    ResourceKind::StreamRoute,
];

/// Dependents before dependencies, for deletions.
pub const DELETE_ORDER: [ResourceKind; 11] = [
    ResourceKind::Route,
    ResourceKind::StreamRoute,
    ResourceKind::Consumer,
    ResourceKind::Service,
    ResourceKind::PluginConfig,
    ResourceKind::ConsumerGroup,
    ResourceKind::Upstream,
    ResourceKind::Ssl,
    ResourceKind::PluginMetadata,
    ResourceKind::GlobalRule,
    ResourceKind::Proto,
];

/// IDs written to etcd, per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub deleted: BTreeMap<ResourceKind, Vec<String>>,
    pub published: BTreeMap<ResourceKind, Vec<String>>,
}

impl PublishReport {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.published.is_empty()
    }

    fn merge(&mut self, other: PublishReport) {
        for (kind, ids) in other.deleted {
            self.deleted.entry(kind).or_default().extend(ids);
        }
        for (kind, ids) in other.published {
            self.published.entry(kind).or_default().extend(ids);
        }
    }
}

/// Rows to write, grouped by kind, plus their etcd entries in put order.
struct UpsertPlan {
    rows: HashMap<ResourceKind, Vec<DraftRow>>,
    entries: Vec<(String, String)>,
}

pub struct PublishPipeline<'a> {
    scope: &'a GatewayScope,
}

impl<'a> PublishPipeline<'a> {
    pub(crate) fn new(scope: &'a GatewayScope) -> Self {
        Self { scope }
    }

    fn gateway_id(&self) -> i64 {
        self.scope.ctx.gateway_id()
    }

    /// Publishes `ids` of `kind`, forcing their dependencies along.
    pub async fn publish(&self, kind: ResourceKind, ids: &[String]) -> Result<PublishReport> {
        let ctx = &self.scope.ctx;
        ctx.gateway.ensure_writable()?;
        if ids.is_empty() {
            return Ok(PublishReport::default());
        }

        let rows = load_exact(self.scope.persistence.as_ref(), self.gateway_id(), kind, ids).await?;
        ensure_all(&rows, OperationType::Publish)?;
        let (deletes, upserts): (Vec<DraftRow>, Vec<DraftRow>) = rows
            .into_iter()
            .partition(|row| row.status == ResourceStatus::DeleteDraft);

        // Everything that can be rejected is checked before the first etcd write.
        let plan = if upserts.is_empty() {
            None
        } else {
            Some(self.plan_upserts(kind, upserts).await?)
        };
        if !deletes.is_empty() {
            self.ensure_unreferenced(kind, &deletes).await?;
        }

        let mut report = PublishReport::default();
        let result = async {
            if !deletes.is_empty() {
                self.apply_deletes(kind, &deletes, &mut report).await?;
            }
            if let Some(plan) = plan {
                self.apply_upserts(plan, &mut report).await?;
            }
            Ok::<(), GantryError>(())
        }
        .await;

        if !report.is_empty() || matches!(result, Err(GantryError::PartialFailure { .. })) {
            self.scope.resync.request(self.gateway_id());
        }
        result?;

        counter!("gantry_publish_batches_total", "kind" => kind.as_str()).increment(1);
        info!(
            gateway = %ctx.gateway.name,
            %kind,
            operator = %ctx.operator,
            deleted = report.deleted.values().map(Vec::len).sum::<usize>(),
            published = report.published.values().map(Vec::len).sum::<usize>(),
            "Published resources"
        );
        Ok(report)
    }

    /// Publishes every pending draft: deletions dependents first, then
    /// upserts kind by kind.
    pub async fn publish_all(&self) -> Result<PublishReport> {
        let mut report = PublishReport::default();
        for kind in DELETE_ORDER {
            let ids = self
                .pending_ids(kind, &[ResourceStatus::DeleteDraft])
                .await?;
            report.merge(self.publish(kind, &ids).await?);
        }
        for kind in ResourceKind::ALL {
            let ids = self
                .pending_ids(kind, &[ResourceStatus::CreateDraft, ResourceStatus::UpdateDraft])
                .await?;
            report.merge(self.publish(kind, &ids).await?);
        }
        Ok(report)
    }

    async fn pending_ids(
        &self,
        kind: ResourceKind,
        statuses: &[ResourceStatus],
    ) -> Result<Vec<String>> {
        Ok(self
            .scope
            .persistence
            .resource_find(self.gateway_id(), kind, &DraftFilter::all().with_statuses(statuses))
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect())
    }

    /// A published resource cannot disappear while drafts still point at it.
    async fn ensure_unreferenced(&self, kind: ResourceKind, rows: &[DraftRow]) -> Result<()> {
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let mut referenced: Vec<String> = Vec::new();
        let mut referrers: Vec<String> = Vec::new();
        for (referrer_kind, relation) in kind.referenced_by() {
            let found = self
                .scope
                .persistence
                .resource_find_referencing(self.gateway_id(), *referrer_kind, *relation, &ids)
                .await?;
            for row in found {
                if let Some(target) = row.relation(*relation)
                    && !referenced.iter().any(|id| id == target)
                {
                    referenced.push(target.to_string());
                }
                referrers.push(format!("{} {}({})", referrer_kind, row.id, row.name));
            }
        }
        if referrers.is_empty() {
            return Ok(());
        }
        Err(GantryError::Dependency {
            kind,
            ids: referenced,
            reason: format!("still referenced by {}", referrers.join(", ")),
        })
    }

    async fn apply_deletes(
        &self,
        kind: ResourceKind,
        rows: &[DraftRow],
        report: &mut PublishReport,
    ) -> Result<()> {
        let ctx = &self.scope.ctx;
        let cap = capability(kind);
        let keys: Vec<String> = rows
            .iter()
            .map(|row| ctx.gateway.resource_key(kind, &cap.etcd_key(row)))
            .collect();
        self.scope.etcd.batch_delete(&keys).await?;

        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let audit = AuditEntryBuilder::new(ctx, kind, OperationType::Publish)
            .before_rows(rows)
            .after_removed(rows)
            .build()?;
        let changes = DraftChangeSet {
            removals: ids.clone(),
            audit_logs: vec![audit],
            ..Default::default()
        };
        if let Err(e) = self
            .scope
            .persistence
            .resource_apply(self.gateway_id(), kind, changes)
            .await
        {
            let e = GantryError::from(e);
            error!(%kind, ids = ?ids, error = %e, "etcd keys removed but drafts were not");
            return Err(GantryError::PartialFailure {
                kind,
                ids,
                reason: format!("removing drafts failed: {}", e),
            });
        }
        report.deleted.insert(kind, ids);
        Ok(())
    }

    /// Pulls in every resource the rows reference, transitively.
    async fn plan_upserts(&self, kind: ResourceKind, rows: Vec<DraftRow>) -> Result<UpsertPlan> {
        let mut selected: HashMap<ResourceKind, Vec<DraftRow>> = HashMap::new();
        let mut frontier = rows.clone();
        selected.insert(kind, rows);

        while !frontier.is_empty() {
            let mut wanted: BTreeMap<ResourceKind, Vec<String>> = BTreeMap::new();
            for row in &frontier {
                for relation in row.kind.relations() {
                    let Some(id) = row.relation(*relation) else {
                        continue;
                    };
                    let target = relation.target();
                    let known = selected
                        .get(&target)
                        .is_some_and(|rows| rows.iter().any(|r| r.id == id));
                    let queued = wanted
                        .get(&target)
                        .is_some_and(|ids| ids.iter().any(|i| i == id));
                    if !known && !queued {
                        wanted.entry(target).or_default().push(id.to_string());
                    }
                }
            }
            frontier.clear();

            for (target, ids) in wanted {
                let found = self
                    .scope
                    .persistence
                    .resource_find(self.gateway_id(), target, &DraftFilter::by_ids(&ids))
                    .await?;
                let missing: Vec<String> = ids
                    .iter()
                    .filter(|id| !found.iter().any(|row| &row.id == *id))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(GantryError::Dependency {
                        kind: target,
                        ids: missing,
                        reason: "referenced resource does not exist".to_string(),
                    });
                }
                let deleting: Vec<String> = found
                    .iter()
                    .filter(|row| row.status == ResourceStatus::DeleteDraft)
                    .map(|row| row.id.clone())
                    .collect();
                if !deleting.is_empty() {
                    return Err(GantryError::Dependency {
                        kind: target,
                        ids: deleting,
                        reason: "referenced resource is pending deletion".to_string(),
                    });
                }
                frontier.extend(found.iter().cloned());
                selected.entry(target).or_default().extend(found);
            }
        }

        let version = self.scope.ctx.gateway.version();
        let mut entries = Vec::new();
        for kind in PUT_ORDER {
            let cap = capability(kind);
            for row in selected.get(&kind).into_iter().flatten() {
                let payload = cap.prepare_payload(row, version)?;
                entries.push((
                    self.scope.ctx.gateway.resource_key(kind, &cap.etcd_key(row)),
                    payload.to_json()?,
                ));
            }
        }
        Ok(UpsertPlan {
            rows: selected,
            entries,
        })
    }

    async fn apply_upserts(&self, plan: UpsertPlan, report: &mut PublishReport) -> Result<()> {
        let ctx = &self.scope.ctx;
        self.scope.etcd.batch_put(&plan.entries).await?;

        for kind in PUT_ORDER {
            let Some(rows) = plan.rows.get(&kind) else {
                continue;
            };
            let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
            // dependencies already live are rewritten but keep their status
            let flipped: Vec<String> = rows
                .iter()
                .filter(|row| {
                    matches!(
                        StatusMachine::for_row(row).next_status(OperationType::Publish),
                        Ok(ResourceStatus::Success)
                    )
                })
                .map(|row| row.id.clone())
                .collect();

            let audit = AuditEntryBuilder::new(ctx, kind, OperationType::Publish)
                .before_rows(rows)
                .after_status(rows, ResourceStatus::Success)
                .build()?;
            let mut changes = DraftChangeSet {
                audit_logs: vec![audit],
                ..Default::default()
            };
            if !flipped.is_empty() {
                changes.status_updates.push(StatusUpdate {
                    ids: flipped,
                    status: ResourceStatus::Success,
                    operation_type: Some(OperationType::Publish),
                    updater: ctx.operator.clone(),
                });
            }
            if let Err(e) = self
                .scope
                .persistence
                .resource_apply(self.gateway_id(), kind, changes)
                .await
            {
                let e = GantryError::from(e);
                warn!(%kind, ids = ?ids, error = %e, "etcd updated but draft status was not");
                return Err(GantryError::PartialFailure {
                    kind,
                    ids,
                    reason: format!("status update failed: {}", e),
                });
            }
            report.published.insert(kind, ids);
        }
        Ok(())
    }
}
