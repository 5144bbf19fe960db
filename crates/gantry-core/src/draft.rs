//! Draft CRUD
//!
//! Edits never touch etcd; they stage rows in the per-kind draft tables
//! for a later publish. Each call is one transaction carrying its audit
//! entry.

use chrono::Utc;
use gantry_common::{GantryError, OperationType, ResourceKind, ResourceStatus, Result};
use gantry_persistence::{
    DraftChangeSet, DraftFilter, DraftRow, Page, PersistenceService, ResourcePersistence,
    StatusUpdate,
};
use serde_json::Value;
use tracing::info;

use crate::audit::AuditEntryBuilder;
use crate::document::ResourceDocument;
use crate::registry::capability;
use crate::service::GatewayScope;
use crate::status::{StatusMachine, edit_status, ensure_all};

/// Loads exactly `ids` (deduplicated, in request order), failing with
/// `NotFound` listing every missing one.
pub(crate) async fn load_exact(
    persistence: &dyn PersistenceService,
    gateway_id: i64,
    kind: ResourceKind,
    ids: &[String],
) -> Result<Vec<DraftRow>> {
    let mut wanted: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !wanted.contains(id) {
            wanted.push(id.clone());
        }
    }
    let mut found = persistence
        .resource_find(gateway_id, kind, &DraftFilter::by_ids(&wanted))
        .await?;

    let missing: Vec<String> = wanted
        .iter()
        .filter(|id| !found.iter().any(|row| &row.id == *id))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(GantryError::not_found(kind, missing));
    }
    found.sort_by_key(|row| wanted.iter().position(|id| *id == row.id));
    Ok(found)
}

/// Consumers are keyed by the draft ID but never carry `id` in their payload;
/// plugin metadata is keyed by plugin name.
pub(crate) fn keeps_config_id(kind: ResourceKind) -> bool {
    !matches!(kind, ResourceKind::Consumer | ResourceKind::PluginMetadata)
}

fn requires_name(kind: ResourceKind) -> bool {
    matches!(kind, ResourceKind::Consumer | ResourceKind::PluginMetadata)
}

/// Parses an operator-supplied config, dropping etcd-managed timestamps.
pub(crate) fn prepare_document(kind: ResourceKind, config: Value) -> Result<ResourceDocument> {
    let mut doc = ResourceDocument::from_value(config)?;
    doc.strip_timestamps();
    if requires_name(kind) && doc.display_name(kind).is_none() {
        return Err(GantryError::Validation(format!(
            "{} requires a non-empty '{}'",
            kind,
            kind.name_field()
        )));
    }
    Ok(doc)
}

pub struct DraftService<'a> {
    scope: &'a GatewayScope,
}

impl<'a> DraftService<'a> {
    pub(crate) fn new(scope: &'a GatewayScope) -> Self {
        Self { scope }
    }

    fn gateway_id(&self) -> i64 {
        self.scope.ctx.gateway_id()
    }

    async fn ensure_unique_name(
        &self,
        kind: ResourceKind,
        name: Option<&str>,
        own_id: &str,
    ) -> Result<()> {
        let Some(name) = name else {
            return Ok(());
        };
        let clashes = self
            .scope
            .persistence
            .resource_find(
                self.gateway_id(),
                kind,
                &DraftFilter::by_names(&[name.to_string()]),
            )
            .await?;
        if let Some(other) = clashes.iter().find(|row| row.id != own_id) {
            return Err(GantryError::Validation(format!(
                "{} name '{}' is already used by '{}'",
                kind, name, other.id
            )));
        }
        Ok(())
    }

    pub async fn create(&self, kind: ResourceKind, config: Value) -> Result<DraftRow> {
        let ctx = &self.scope.ctx;
        ctx.gateway.ensure_writable()?;

        let mut doc = prepare_document(kind, config)?;
        let id = doc
            .id
            .take()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| kind.generate_id());
        if keeps_config_id(kind) {
            doc.id = Some(id.clone());
        }

        let existing = self
            .scope
            .persistence
            .resource_find(self.gateway_id(), kind, &DraftFilter::by_ids(&[id.clone()]))
            .await?;
        if !existing.is_empty() {
            return Err(GantryError::Validation(format!(
                "{} id '{}' already exists",
                kind, id
            )));
        }
        let cap = capability(kind);
        self.ensure_unique_name(kind, cap.name_of(&doc), &id).await?;

        let status = StatusMachine::absent(&id).next_status(OperationType::Create)?;
        let mut row = cap.to_draft_row(
            self.gateway_id(),
            &id,
            &doc,
            status,
            &ctx.operator,
            Utc::now().naive_utc(),
        )?;
        row.operation_type = Some(OperationType::Create);

        let audit = AuditEntryBuilder::new(ctx, kind, OperationType::Create)
            .after_rows(std::slice::from_ref(&row))
            .build()?;
        self.scope
            .persistence
            .resource_apply(
                self.gateway_id(),
                kind,
                DraftChangeSet {
                    inserts: vec![row.clone()],
                    audit_logs: vec![audit],
                    ..Default::default()
                },
            )
            .await?;

        info!(gateway = %ctx.gateway.name, %kind, id = %row.id, "Created draft");
        Ok(row)
    }

    pub async fn update(&self, kind: ResourceKind, id: &str, config: Value) -> Result<DraftRow> {
        let ctx = &self.scope.ctx;
        ctx.gateway.ensure_writable()?;

        let current = self.get(kind, id).await?;
        let status = StatusMachine::for_row(&current).next_status(OperationType::Update)?;

        let mut doc = prepare_document(kind, config)?;
        doc.id = keeps_config_id(kind).then(|| id.to_string());
        let cap = capability(kind);
        let name = cap.name_of(&doc);
        if kind == ResourceKind::PluginMetadata
            && current.status != ResourceStatus::CreateDraft
            && name != Some(current.name.as_str())
        {
            return Err(GantryError::Validation(format!(
                "plugin metadata '{}' cannot be renamed once published",
                current.name
            )));
        }
        self.ensure_unique_name(kind, name, id).await?;

        let mut row = current.clone();
        cap.refresh_row(&mut row, &doc)?;
        row.status = status;
        row.operation_type = Some(OperationType::Update);
        row.updater = ctx.operator.clone();
        row.updated_at = Utc::now().naive_utc();

        let audit = AuditEntryBuilder::new(ctx, kind, OperationType::Update)
            .before_rows(std::slice::from_ref(&current))
            .after_rows(std::slice::from_ref(&row))
            .build()?;
        self.scope
            .persistence
            .resource_apply(
                self.gateway_id(),
                kind,
                DraftChangeSet {
                    updates: vec![row.clone()],
                    audit_logs: vec![audit],
                    ..Default::default()
                },
            )
            .await?;
        Ok(row)
    }

    /// Unpublished rows disappear; published ones become pending deletes.
    pub async fn delete(&self, kind: ResourceKind, ids: &[String]) -> Result<()> {
        let ctx = &self.scope.ctx;
        ctx.gateway.ensure_writable()?;
        if ids.is_empty() {
            return Ok(());
        }

        let rows = load_exact(self.scope.persistence.as_ref(), self.gateway_id(), kind, ids).await?;
        ensure_all(&rows, OperationType::Delete)?;

        let (mut removed, mut pending) = (Vec::new(), Vec::new());
        for row in rows.iter() {
            match StatusMachine::for_row(row).next_status(OperationType::Delete)? {
                ResourceStatus::Deleted => removed.push(row.clone()),
                _ => pending.push(row.clone()),
            }
        }

        let audit = AuditEntryBuilder::new(ctx, kind, OperationType::Delete)
            .before_rows(&rows)
            .after_removed(&removed)
            .after_status(&pending, ResourceStatus::DeleteDraft)
            .build()?;
        let mut changes = DraftChangeSet {
            removals: removed.iter().map(|row| row.id.clone()).collect(),
            audit_logs: vec![audit],
            ..Default::default()
        };
        if !pending.is_empty() {
            changes.status_updates.push(StatusUpdate {
                ids: pending.iter().map(|row| row.id.clone()).collect(),
                status: ResourceStatus::DeleteDraft,
                operation_type: Some(OperationType::Delete),
                updater: ctx.operator.clone(),
            });
        }
        self.scope
            .persistence
            .resource_apply(self.gateway_id(), kind, changes)
            .await?;

        info!(
            gateway = %ctx.gateway.name,
            %kind,
            removed = removed.len(),
            pending = pending.len(),
            "Deleted drafts"
        );
        Ok(())
    }

    pub async fn get(&self, kind: ResourceKind, id: &str) -> Result<DraftRow> {
        let mut rows = load_exact(
            self.scope.persistence.as_ref(),
            self.gateway_id(),
            kind,
            &[id.to_string()],
        )
        .await?;
        rows.pop()
            .ok_or_else(|| GantryError::not_found(kind, vec![id.to_string()]))
    }

    pub async fn list(&self, kind: ResourceKind, filter: &DraftFilter) -> Result<Vec<DraftRow>> {
        Ok(self
            .scope
            .persistence
            .resource_find(self.gateway_id(), kind, filter)
            .await?)
    }

    pub async fn search_page(
        &self,
        kind: ResourceKind,
        filter: &DraftFilter,
        page_no: u64,
        page_size: u64,
    ) -> Result<Page<DraftRow>> {
        Ok(self
            .scope
            .persistence
            .resource_search_page(self.gateway_id(), kind, filter, page_no.max(1), page_size)
            .await?)
    }

    /// Marks rows touched by a bulk editor as edited.
    pub async fn update_status_for_edit(&self, kind: ResourceKind, ids: &[String]) -> Result<()> {
        let ctx = &self.scope.ctx;
        ctx.gateway.ensure_writable()?;
        if ids.is_empty() {
            return Ok(());
        }
        let rows = load_exact(self.scope.persistence.as_ref(), self.gateway_id(), kind, ids).await?;

        let mut changes = DraftChangeSet::default();
        let mut audit = AuditEntryBuilder::new(ctx, kind, OperationType::Update).before_rows(&rows);
        for status in [ResourceStatus::CreateDraft, ResourceStatus::UpdateDraft] {
            let group: Vec<DraftRow> = rows
                .iter()
                .filter(|row| edit_status(row.status) == status)
                .cloned()
                .collect();
            if group.is_empty() {
                continue;
            }
            audit = audit.after_status(&group, status);
            changes.status_updates.push(StatusUpdate {
                ids: group.iter().map(|row| row.id.clone()).collect(),
                status,
                operation_type: Some(OperationType::Update),
                updater: ctx.operator.clone(),
            });
        }
        changes.audit_logs.push(audit.build()?);
        self.scope
            .persistence
            .resource_apply(self.gateway_id(), kind, changes)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, gateway_info};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_id_and_columns() {
        let fx = Fixture::new().await;
        let scope = fx.scope();
        let row = scope
            .drafts()
            .create(
                ResourceKind::Route,
                json!({"name": "r", "uri": "/a", "service_id": "s1", "create_time": 1}),
            )
            .await
            .unwrap();

        assert!(row.id.starts_with("bk.r."));
        assert_eq!(row.status, ResourceStatus::CreateDraft);
        assert_eq!(row.service_id.as_deref(), Some("s1"));
        let config: Value = serde_json::from_str(&row.config).unwrap();
        assert_eq!(config["id"], json!(row.id));
        assert!(config.get("create_time").is_none());
        assert_eq!(fx.persistence.audit_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let fx = Fixture::new().await;
        let scope = fx.scope();
        let drafts = scope.drafts();
        drafts
            .create(ResourceKind::Route, json!({"id": "r1", "name": "a"}))
            .await
            .unwrap();

        let dup_id = drafts
            .create(ResourceKind::Route, json!({"id": "r1", "name": "b"}))
            .await;
        assert!(matches!(dup_id, Err(GantryError::Validation(_))));
        let dup_name = drafts
            .create(ResourceKind::Route, json!({"id": "r2", "name": "a"}))
            .await;
        assert!(matches!(dup_name, Err(GantryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_consumer_requires_username_and_keeps_no_id() {
        let fx = Fixture::new().await;
        let scope = fx.scope();
        let missing = scope.drafts().create(ResourceKind::Consumer, json!({"plugins": {}})).await;
        assert!(matches!(missing, Err(GantryError::Validation(_))));

        let row = scope
            .drafts()
            .create(ResourceKind::Consumer, json!({"id": "c1", "username": "jack"}))
            .await
            .unwrap();
        assert_eq!(row.id, "c1");
        assert_eq!(row.name, "jack");
        assert_eq!(row.config, r#"{"username":"jack"}"#);
    }

    #[tokio::test]
    async fn test_update_follows_state_machine() {
        let fx = Fixture::new().await;
        fx.insert_draft(ResourceKind::Route, "r1", r#"{"id":"r1","uri":"/a"}"#, ResourceStatus::Success)
            .await;
        let scope = fx.scope();

        let row = scope
            .drafts()
            .update(ResourceKind::Route, "r1", json!({"uri": "/b", "upstream_id": "u1"}))
            .await
            .unwrap();
        assert_eq!(row.status, ResourceStatus::UpdateDraft);
        assert_eq!(row.upstream_id.as_deref(), Some("u1"));
        assert_eq!(row.config, r#"{"id":"r1","upstream_id":"u1","uri":"/b"}"#);

        let missing = scope.drafts().update(ResourceKind::Route, "nope", json!({})).await;
        assert!(matches!(missing, Err(GantryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_on_pending_delete_is_illegal() {
        let fx = Fixture::new().await;
        fx.insert_draft(ResourceKind::Route, "r1", "{}", ResourceStatus::DeleteDraft).await;
        let before = fx.find_draft(ResourceKind::Route, "r1").await.unwrap();

        let err = fx
            .scope()
            .drafts()
            .update(ResourceKind::Route, "r1", json!({"uri": "/x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GantryError::IllegalTransition { .. }));
        assert_eq!(fx.find_draft(ResourceKind::Route, "r1").await.unwrap(), before);
        assert!(fx.persistence.audit_logs().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_unpublished_and_soft_deletes_published() {
        let fx = Fixture::new().await;
        fx.insert_draft(ResourceKind::Route, "new", "{}", ResourceStatus::CreateDraft).await;
        fx.insert_draft(ResourceKind::Route, "live", "{}", ResourceStatus::Success).await;

        fx.scope()
            .drafts()
            .delete(ResourceKind::Route, &["new".to_string(), "live".to_string()])
            .await
            .unwrap();

        assert!(fx.find_draft(ResourceKind::Route, "new").await.is_none());
        let live = fx.find_draft(ResourceKind::Route, "live").await.unwrap();
        assert_eq!(live.status, ResourceStatus::DeleteDraft);
        assert_eq!(live.operation_type, Some(OperationType::Delete));
        assert_eq!(fx.persistence.audit_logs()[0].resource_ids, "new,live");
    }

    #[tokio::test]
    async fn test_delete_checks_every_row_first() {
        let fx = Fixture::new().await;
        fx.insert_draft(ResourceKind::Route, "a", "{}", ResourceStatus::CreateDraft).await;
        fx.insert_draft(ResourceKind::Route, "b", "{}", ResourceStatus::DeleteDraft).await;

        let err = fx
            .scope()
            .drafts()
            .delete(ResourceKind::Route, &["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, GantryError::IllegalTransition { .. }));
        assert!(fx.find_draft(ResourceKind::Route, "a").await.is_some());
    }

    #[tokio::test]
    async fn test_read_only_gateway_rejects_edits() {
        let mut gateway = gateway_info();
        gateway.read_only = true;
        let fx = Fixture::with_gateway(gateway).await;
        let err = fx
            .scope()
            .drafts()
            .create(ResourceKind::Route, json!({"uri": "/"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GantryError::GatewayReadOnly(_)));
    }

    #[tokio::test]
    async fn test_update_status_for_edit() {
        let fx = Fixture::new().await;
        fx.insert_draft(ResourceKind::Service, "s1", "{}", ResourceStatus::CreateDraft).await;
        fx.insert_draft(ResourceKind::Service, "s2", "{}", ResourceStatus::Success).await;

        fx.scope()
            .drafts()
            .update_status_for_edit(ResourceKind::Service, &["s1".to_string(), "s2".to_string()])
            .await
            .unwrap();
        assert_eq!(
            fx.find_draft(ResourceKind::Service, "s1").await.unwrap().status,
            ResourceStatus::CreateDraft
        );
        assert_eq!(
            fx.find_draft(ResourceKind::Service, "s2").await.unwrap().status,
            ResourceStatus::UpdateDraft
        );
    }

    #[tokio::test]
    async fn test_search_page() {
        let fx = Fixture::new().await;
        for i in 0..5 {
            fx.insert_draft(
                ResourceKind::Upstream,
                &format!("u{i}"),
                &format!(r#"{{"name":"up-{i}"}}"#),
                ResourceStatus::CreateDraft,
            )
            .await;
        }
        let filter = DraftFilter {
            name_contains: Some("up-".to_string()),
            ..Default::default()
        };
        let page = fx
            .scope()
            .drafts()
            .search_page(ResourceKind::Upstream, &filter, 2, 2)
            .await
            .unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.pages_available, 3);
        assert_eq!(page.page_items.len(), 2);
    }
}
