//! In-memory persistence backend
//!
//! Keeps every table in one lock so each trait call is atomic, matching the
//! transactional contract of the SQL backend. Used by tests and by
//! `storage_mode = memory` deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use gantry_common::{GatewayInfo, Relation, ResourceKind};
use parking_lot::RwLock;

use crate::model::{
    AuditLogFilter, AuditLogRecord, DraftChangeSet, DraftFilter, DraftRow, Page, StorageMode,
    SyncChangeSet, SyncDataRow,
};
use crate::traits::*;

#[derive(Default)]
struct Tables {
    gateways: BTreeMap<i64, GatewayInfo>,
    /// Insertion-ordered rows per (gateway, kind).
    drafts: HashMap<(i64, ResourceKind), Vec<DraftRow>>,
    sync_data: BTreeMap<(i64, ResourceKind, String), SyncDataRow>,
    audit_logs: Vec<AuditLogRecord>,
}

/// In-memory persistence service
#[derive(Default)]
pub struct MemoryPersistService {
    tables: RwLock<Tables>,
    sync_writes: AtomicU64,
    fail_resource_writes: AtomicBool,
}

impl MemoryPersistService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows inserted, updated or deleted in the snapshot table so far.
    pub fn sync_write_count(&self) -> u64 {
        self.sync_writes.load(Ordering::SeqCst)
    }

    /// Makes `resource_apply` fail without writing, like a lost database.
    pub fn set_fail_resource_writes(&self, fail: bool) {
        self.fail_resource_writes.store(fail, Ordering::SeqCst);
    }

    pub fn audit_logs(&self) -> Vec<AuditLogRecord> {
        self.tables.read().audit_logs.clone()
    }
}

#[async_trait]
impl PersistenceService for MemoryPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl GatewayPersistence for MemoryPersistService {
    async fn gateway_find(&self, gateway_id: i64) -> anyhow::Result<Option<GatewayInfo>> {
        Ok(self.tables.read().gateways.get(&gateway_id).cloned())
    }

    async fn gateway_find_all(&self) -> anyhow::Result<Vec<GatewayInfo>> {
        Ok(self.tables.read().gateways.values().cloned().collect())
    }

    async fn gateway_create(&self, info: &GatewayInfo, _operator: &str) -> anyhow::Result<i64> {
        let mut tables = self.tables.write();
        if tables.gateways.values().any(|g| g.name == info.name) {
            anyhow::bail!("gateway '{}' already exists", info.name);
        }
        let id = tables.gateways.keys().next_back().copied().unwrap_or(0) + 1;
        let mut gateway = info.clone();
        gateway.id = id;
        tables.gateways.insert(id, gateway);
        Ok(id)
    }
}

#[async_trait]
impl ResourcePersistence for MemoryPersistService {
    async fn resource_find(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        filter: &DraftFilter,
    ) -> anyhow::Result<Vec<DraftRow>> {
        Ok(self
            .tables
            .read()
            .drafts
            .get(&(gateway_id, kind))
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn resource_search_page(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        filter: &DraftFilter,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<DraftRow>> {
        let mut rows = self.resource_find(gateway_id, kind, filter).await?;
        rows.reverse();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(Page::slice(rows, page_no, page_size))
    }

    async fn resource_find_referencing(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        relation: Relation,
        target_ids: &[String],
    ) -> anyhow::Result<Vec<DraftRow>> {
        Ok(self
            .tables
            .read()
            .drafts
            .get(&(gateway_id, kind))
            .map(|rows| {
                rows.iter()
                    .filter(|r| {
                        r.relation(relation)
                            .is_some_and(|id| target_ids.iter().any(|t| t == id))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn resource_apply(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        changes: DraftChangeSet,
    ) -> anyhow::Result<()> {
        self.resource_apply_all(gateway_id, vec![(kind, changes)])
            .await
    }

    async fn resource_apply_all(
        &self,
        gateway_id: i64,
        changes: Vec<(ResourceKind, DraftChangeSet)>,
    ) -> anyhow::Result<()> {
        if self.fail_resource_writes.load(Ordering::SeqCst)
            && let Some((kind, _)) = changes.first()
        {
            anyhow::bail!("draft table {} is unavailable", kind.table_name());
        }
        let now = Utc::now().naive_utc();
        let mut tables = self.tables.write();

        // Validate every kind before mutating so the call stays all-or-nothing.
        for (kind, set) in &changes {
            let existing = tables.drafts.get(&(gateway_id, *kind));
            for row in &set.inserts {
                if existing.is_some_and(|rows| rows.iter().any(|r| r.id == row.id)) {
                    anyhow::bail!("duplicate {} id '{}'", kind, row.id);
                }
            }
        }

        for (kind, set) in changes {
            apply_draft_changes(&mut tables, gateway_id, kind, set, now);
        }
        Ok(())
    }
}

fn apply_draft_changes(
    tables: &mut Tables,
    gateway_id: i64,
    kind: ResourceKind,
    changes: DraftChangeSet,
    now: NaiveDateTime,
) {
    let rows = tables.drafts.entry((gateway_id, kind)).or_default();
    rows.extend(changes.inserts);
    for update in changes.updates {
        if let Some(row) = rows.iter_mut().find(|r| r.id == update.id) {
            *row = update;
        }
    }
    for change in &changes.status_updates {
        for row in rows.iter_mut().filter(|r| change.ids.contains(&r.id)) {
            row.status = change.status;
            row.operation_type = change.operation_type;
            row.updater = change.updater.clone();
            row.updated_at = now;
        }
    }
    rows.retain(|r| !changes.removals.contains(&r.id));

    append_audit(tables, changes.audit_logs);
}

fn append_audit(tables: &mut Tables, records: Vec<AuditLogRecord>) {
    for mut record in records {
        record.id = tables.audit_logs.len() as i64 + 1;
        tables.audit_logs.push(record);
    }
}

#[async_trait]
impl SyncDataPersistence for MemoryPersistService {
    async fn sync_data_find_all(
        &self,
        gateway_id: i64,
        kind: Option<ResourceKind>,
    ) -> anyhow::Result<Vec<SyncDataRow>> {
        Ok(self
            .tables
            .read()
            .sync_data
            .values()
            .filter(|r| r.gateway_id == gateway_id && kind.is_none_or(|k| k == r.kind))
            .cloned()
            .collect())
    }

    async fn sync_data_find(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        id: &str,
    ) -> anyhow::Result<Option<SyncDataRow>> {
        Ok(self
            .tables
            .read()
            .sync_data
            .get(&(gateway_id, kind, id.to_string()))
            .cloned())
    }

    async fn sync_data_apply(
        &self,
        gateway_id: i64,
        changes: SyncChangeSet,
        synced_at: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write();
        let Some(gateway) = tables.gateways.get_mut(&gateway_id) else {
            anyhow::bail!("gateway {} not found", gateway_id);
        };
        gateway.last_synced_at = Some(synced_at);

        let writes = changes.len() as u64;
        for row in changes.inserts.into_iter().chain(changes.updates) {
            tables
                .sync_data
                .insert((gateway_id, row.kind, row.id.clone()), row);
        }
        for (kind, id) in changes.deletes {
            tables.sync_data.remove(&(gateway_id, kind, id));
        }
        self.sync_writes.fetch_add(writes, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AuditPersistence for MemoryPersistService {
    async fn audit_append(&self, records: Vec<AuditLogRecord>) -> anyhow::Result<()> {
        append_audit(&mut self.tables.write(), records);
        Ok(())
    }

    async fn audit_search_page(
        &self,
        gateway_id: i64,
        filter: &AuditLogFilter,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<AuditLogRecord>> {
        let items = self
            .tables
            .read()
            .audit_logs
            .iter()
            .rev()
            .filter(|r| r.gateway_id == gateway_id && filter.matches(r))
            .cloned()
            .collect();
        Ok(Page::slice(items, page_no, page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusUpdate;
    use gantry_common::{EtcdConfig, OperationType, ResourceStatus};

    fn gateway() -> GatewayInfo {
        GatewayInfo {
            id: 0,
            name: "gw".to_string(),
            apisix_type: "apisix".to_string(),
            apisix_version: "3.11.X".to_string(),
            etcd: EtcdConfig::default(),
            read_only: false,
            last_synced_at: None,
        }
    }

    fn draft(id: &str, status: ResourceStatus) -> DraftRow {
        let now = Utc::now().naive_utc();
        DraftRow {
            id: id.to_string(),
            gateway_id: 1,
            kind: ResourceKind::Route,
            name: format!("name-{}", id),
            config: "{}".to_string(),
            status,
            service_id: Some("s1".to_string()),
            upstream_id: None,
            plugin_config_id: None,
            group_id: None,
            ssl_id: None,
            operation_type: None,
            creator: "tester".to_string(),
            updater: "tester".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_resource_apply_and_find() {
        let store = MemoryPersistService::new();
        store
            .resource_apply(
                1,
                ResourceKind::Route,
                DraftChangeSet {
                    inserts: vec![
                        draft("r1", ResourceStatus::CreateDraft),
                        draft("r2", ResourceStatus::Success),
                    ],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let drafts = store
            .resource_find(
                1,
                ResourceKind::Route,
                &DraftFilter::all().with_statuses(&ResourceStatus::DRAFTS),
            )
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, "r1");

        store
            .resource_apply(
                1,
                ResourceKind::Route,
                DraftChangeSet {
                    status_updates: vec![StatusUpdate {
                        ids: vec!["r1".to_string()],
                        status: ResourceStatus::Success,
                        operation_type: Some(OperationType::Publish),
                        updater: "bob".to_string(),
                    }],
                    removals: vec!["r2".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let all = store
            .resource_find(1, ResourceKind::Route, &DraftFilter::all())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ResourceStatus::Success);
        assert_eq!(all[0].updater, "bob");
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected_whole() {
        let store = MemoryPersistService::new();
        let changes = DraftChangeSet {
            inserts: vec![draft("r1", ResourceStatus::CreateDraft)],
            ..Default::default()
        };
        store
            .resource_apply(1, ResourceKind::Route, changes.clone())
            .await
            .unwrap();
        assert!(
            store
                .resource_apply(1, ResourceKind::Route, changes)
                .await
                .is_err()
        );
        let rows = store
            .resource_find(1, ResourceKind::Route, &DraftFilter::all())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_all_rejects_every_kind_on_conflict() {
        let store = MemoryPersistService::new();
        store
            .resource_apply(
                1,
                ResourceKind::Route,
                DraftChangeSet {
                    inserts: vec![draft("r1", ResourceStatus::Success)],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut upstream = draft("u1", ResourceStatus::CreateDraft);
        upstream.kind = ResourceKind::Upstream;
        let result = store
            .resource_apply_all(
                1,
                vec![
                    (
                        ResourceKind::Upstream,
                        DraftChangeSet {
                            inserts: vec![upstream.clone()],
                            ..Default::default()
                        },
                    ),
                    (
                        ResourceKind::Route,
                        DraftChangeSet {
                            inserts: vec![draft("r1", ResourceStatus::CreateDraft)],
                            ..Default::default()
                        },
                    ),
                ],
            )
            .await;
        assert!(result.is_err());
        let upstreams = store
            .resource_find(1, ResourceKind::Upstream, &DraftFilter::all())
            .await
            .unwrap();
        assert!(upstreams.is_empty());

        store
            .resource_apply_all(
                1,
                vec![(
                    ResourceKind::Upstream,
                    DraftChangeSet {
                        inserts: vec![upstream],
                        ..Default::default()
                    },
                )],
            )
            .await
            .unwrap();
        let upstreams = store
            .resource_find(1, ResourceKind::Upstream, &DraftFilter::all())
            .await
            .unwrap();
        assert_eq!(upstreams.len(), 1);
    }

    #[tokio::test]
    async fn test_find_referencing() {
        let store = MemoryPersistService::new();
        store
            .resource_apply(
                1,
                ResourceKind::Route,
                DraftChangeSet {
                    inserts: vec![draft("r1", ResourceStatus::Success)],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let refs = store
            .resource_find_referencing(1, ResourceKind::Route, Relation::Service, &["s1".into()])
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        let refs = store
            .resource_find_referencing(1, ResourceKind::Route, Relation::Upstream, &["s1".into()])
            .await
            .unwrap();
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn test_sync_apply_stamps_gateway() {
        let store = MemoryPersistService::new();
        let gateway_id = store.gateway_create(&gateway(), "tester").await.unwrap();
        let now = Utc::now().naive_utc();
        let row = SyncDataRow {
            id: "r1".to_string(),
            gateway_id,
            kind: ResourceKind::Route,
            config: "{}".to_string(),
            mod_revision: 3,
            created_at: now,
            updated_at: now,
        };
        store
            .sync_data_apply(
                gateway_id,
                SyncChangeSet {
                    inserts: vec![row],
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(store.sync_write_count(), 1);
        let gw = store.gateway_find(gateway_id).await.unwrap().unwrap();
        assert_eq!(gw.last_synced_at, Some(now));
        assert!(
            store
                .sync_data_find(gateway_id, ResourceKind::Route, "r1")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_audit_search_newest_first() {
        let store = MemoryPersistService::new();
        let now = Utc::now().naive_utc();
        let records = (0..3)
            .map(|i| AuditLogRecord {
                id: 0,
                gateway_id: 1,
                resource_type: ResourceKind::Route,
                operation_type: OperationType::Publish,
                resource_ids: format!("r{}", i),
                data_before: "[]".to_string(),
                data_after: "[]".to_string(),
                operator: "alice".to_string(),
                created_at: now,
            })
            .collect();
        store.audit_append(records).await.unwrap();

        let page = store
            .audit_search_page(1, &AuditLogFilter::default(), 1, 2)
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.page_items[0].resource_ids, "r2");
        assert_eq!(page.page_items[0].id, 3);
    }
}
