//! Bulk import
//!
//! Loads a batch of configs into the draft tables in one transaction.
//! Unknown IDs become new drafts and known ones are edited in place, so the
//! whole batch still has to be published.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use gantry_common::{GantryError, OperationType, ResourceKind, ResourceStatus, Result};
use gantry_persistence::{DraftChangeSet, DraftFilter, DraftRow, ResourcePersistence};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::audit::AuditEntryBuilder;
use crate::document::ResourceDocument;
use crate::draft::{keeps_config_id, prepare_document};
use crate::publish::PUT_ORDER;
use crate::registry::capability;
use crate::service::GatewayScope;
use crate::status::StatusMachine;

/// One config to import.
#[derive(Debug, Clone)]
pub struct ImportResource {
    pub kind: ResourceKind,
    pub config: Value,
}

/// IDs written by an import, per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub added: BTreeMap<ResourceKind, Vec<String>>,
    pub updated: BTreeMap<ResourceKind, Vec<String>>,
}

struct Parsed {
    kind: ResourceKind,
    id: String,
    doc: ResourceDocument,
}

#[derive(Default)]
struct KindBatch {
    inserts: Vec<DraftRow>,
    before: Vec<DraftRow>,
    updates: Vec<DraftRow>,
}

pub struct Importer<'a> {
    scope: &'a GatewayScope,
}

impl<'a> Importer<'a> {
    pub(crate) fn new(scope: &'a GatewayScope) -> Self {
        Self { scope }
    }

    pub async fn import_resources(&self, resources: Vec<ImportResource>) -> Result<ImportReport> {
        let ctx = &self.scope.ctx;
        ctx.gateway.ensure_writable()?;
        if resources.is_empty() {
            return Ok(ImportReport::default());
        }
        let gateway_id = ctx.gateway_id();

        let mut parsed: Vec<Parsed> = Vec::with_capacity(resources.len());
        for ImportResource { kind, config } in resources {
            let mut doc = prepare_document(kind, config)?;
            let id = doc
                .id
                .take()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| kind.generate_id());
            if keeps_config_id(kind) {
                doc.id = Some(id.clone());
            }
            if parsed.iter().any(|p| p.kind == kind && p.id == id) {
                return Err(GantryError::Validation(format!(
                    "{} id '{}' appears more than once in the import",
                    kind, id
                )));
            }
            parsed.push(Parsed { kind, id, doc });
        }

        let mut drafts: HashMap<ResourceKind, Vec<DraftRow>> = HashMap::new();
        for kind in ResourceKind::ALL {
            let rows = self
                .scope
                .persistence
                .resource_find(gateway_id, kind, &DraftFilter::all())
                .await?;
            drafts.insert(kind, rows);
        }
        let existing = |kind: ResourceKind, id: &str| {
            drafts
                .get(&kind)
                .and_then(|rows| rows.iter().find(|row| row.id == id))
        };

        for item in &parsed {
            for (target, target_id) in capability(item.kind).associated_ids(&item.doc) {
                let in_batch = parsed
                    .iter()
                    .any(|p| p.kind == target && p.id == target_id);
                let managed = existing(target, &target_id)
                    .is_some_and(|row| row.status != ResourceStatus::DeleteDraft);
                if !in_batch && !managed {
                    return Err(GantryError::Dependency {
                        kind: target,
                        ids: vec![target_id],
                        reason: format!(
                            "referenced by {} {} but neither imported nor managed",
                            item.kind, item.id
                        ),
                    });
                }
            }
        }

        let now = Utc::now().naive_utc();
        let mut batches: BTreeMap<ResourceKind, KindBatch> = BTreeMap::new();
        for (index, item) in parsed.iter().enumerate() {
            let cap = capability(item.kind);
            let name = cap.name_of(&item.doc);
            if let Some(name) = name {
                let taken_in_batch = parsed[..index]
                    .iter()
                    .any(|p| p.kind == item.kind && cap.name_of(&p.doc) == Some(name));
                let taken_by_draft = drafts.get(&item.kind).and_then(|rows| {
                    rows.iter()
                        .find(|row| row.name == name && row.id != item.id)
                });
                if taken_in_batch || taken_by_draft.is_some() {
                    return Err(GantryError::Validation(format!(
                        "{} name '{}' of {} is already used by another resource",
                        item.kind, name, item.id
                    )));
                }
            }

            let batch = batches.entry(item.kind).or_default();
            match existing(item.kind, &item.id) {
                Some(current) => {
                    let status =
                        StatusMachine::for_row(current).next_status(OperationType::Update)?;
                    if item.kind == ResourceKind::PluginMetadata
                        && current.status != ResourceStatus::CreateDraft
                        && name != Some(current.name.as_str())
                    {
                        return Err(GantryError::Validation(format!(
                            "plugin metadata '{}' cannot be renamed once published",
                            current.name
                        )));
                    }
                    let mut row = current.clone();
                    cap.refresh_row(&mut row, &item.doc)?;
                    row.status = status;
                    row.operation_type = Some(OperationType::Update);
                    row.updater = ctx.operator.clone();
                    row.updated_at = now;
                    batch.before.push(current.clone());
                    batch.updates.push(row);
                }
                None => {
                    let status =
                        StatusMachine::absent(&item.id).next_status(OperationType::Create)?;
                    let mut row = cap.to_draft_row(
                        gateway_id,
                        &item.id,
                        &item.doc,
                        status,
                        &ctx.operator,
                        now,
                    )?;
                    row.operation_type = Some(OperationType::Create);
                    batch.inserts.push(row);
                }
            }
        }

        let mut report = ImportReport::default();
        let mut changes = Vec::with_capacity(batches.len());
        for kind in PUT_ORDER {
            let Some(batch) = batches.remove(&kind) else {
                continue;
            };
            let mut set = DraftChangeSet::default();
            if !batch.inserts.is_empty() {
                set.audit_logs.push(
                    AuditEntryBuilder::new(ctx, kind, OperationType::Create)
                        .after_rows(&batch.inserts)
                        .build()?,
                );
                report
                    .added
                    .insert(kind, batch.inserts.iter().map(|row| row.id.clone()).collect());
            }
            if !batch.updates.is_empty() {
                set.audit_logs.push(
                    AuditEntryBuilder::new(ctx, kind, OperationType::Update)
                        .before_rows(&batch.before)
                        .after_rows(&batch.updates)
                        .build()?,
                );
                report
                    .updated
                    .insert(kind, batch.updates.iter().map(|row| row.id.clone()).collect());
            }
            set.inserts = batch.inserts;
            set.updates = batch.updates;
            changes.push((kind, set));
        }
        self.scope
            .persistence
            .resource_apply_all(gateway_id, changes)
            .await?;

        info!(
            gateway = %ctx.gateway.name,
            operator = %ctx.operator,
            added = report.added.values().map(Vec::len).sum::<usize>(),
            updated = report.updated.values().map(Vec::len).sum::<usize>(),
            "Imported resources"
        );
        Ok(report)
    }
}
