//! SQL-based persistence backend (MySQL/PostgreSQL via SeaORM)
//!
//! Fixed tables go through SeaORM entities; the per-kind draft tables share
//! one column layout and are addressed with dynamic statements from [`draft`].
//! Bulk statements are chunked to [`DB_BATCH_SIZE`] rows.

mod draft;
pub mod schema;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use gantry_common::{DB_BATCH_SIZE, GatewayInfo, Relation, ResourceKind};
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};

use crate::entity::{gateway, gateway_sync_data, operation_audit_log};
use crate::model::{
    AuditLogFilter, AuditLogRecord, DraftChangeSet, DraftFilter, DraftRow, Page, StorageMode,
    SyncChangeSet, SyncDataRow,
};
use crate::traits::*;

use draft::{DraftRecord, col};

/// External database persistence service
///
/// Wraps a SeaORM `DatabaseConnection` and implements all persistence traits.
pub struct ExternalDbPersistService {
    db: DatabaseConnection,
}

impl ExternalDbPersistService {
    /// Create a new ExternalDbPersistService with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn select_drafts(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        filter: &DraftFilter,
    ) -> anyhow::Result<Vec<DraftRow>> {
        let stmt = self
            .db
            .get_database_backend()
            .build(&draft::select(kind, draft::filter_condition(gateway_id, filter)));
        DraftRecord::find_by_statement(stmt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|record| record.into_row(kind))
            .collect()
    }
}

// ============================================================================
// PersistenceService implementation
// ============================================================================

#[async_trait]
impl PersistenceService for ExternalDbPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::ExternalDb
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        // Execute a simple query to verify connectivity
        gateway::Entity::find()
            .select_only()
            .column_as(Expr::cust("1"), "health")
            .into_tuple::<i32>()
            .one(&self.db)
            .await?;
        Ok(())
    }
}

// ============================================================================
// GatewayPersistence implementation
// ============================================================================

fn to_gateway_info(model: gateway::Model) -> anyhow::Result<GatewayInfo> {
    Ok(GatewayInfo {
        etcd: serde_json::from_str(&model.etcd_config)?,
        id: model.id,
        name: model.name,
        apisix_type: model.apisix_type,
        apisix_version: model.apisix_version,
        read_only: model.read_only,
        last_synced_at: model.last_synced_at,
    })
}

#[async_trait]
impl GatewayPersistence for ExternalDbPersistService {
    async fn gateway_find(&self, gateway_id: i64) -> anyhow::Result<Option<GatewayInfo>> {
        gateway::Entity::find_by_id(gateway_id)
            .one(&self.db)
            .await?
            .map(to_gateway_info)
            .transpose()
    }

    async fn gateway_find_all(&self) -> anyhow::Result<Vec<GatewayInfo>> {
        gateway::Entity::find()
            .order_by_asc(gateway::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_gateway_info)
            .collect()
    }

    async fn gateway_create(&self, info: &GatewayInfo, operator: &str) -> anyhow::Result<i64> {
        let now = Utc::now().naive_utc();
        let model = gateway::ActiveModel {
            name: Set(info.name.clone()),
            apisix_type: Set(info.apisix_type.clone()),
            apisix_version: Set(info.apisix_version.clone()),
            etcd_config: Set(serde_json::to_string(&info.etcd)?),
            read_only: Set(info.read_only),
            last_synced_at: Set(None),
            creator: Set(operator.to_string()),
            updater: Set(operator.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let result = gateway::Entity::insert(model).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }
}

// ============================================================================
// ResourcePersistence implementation
// ============================================================================

async fn apply_status_updates(
    txn: &DatabaseTransaction,
    gateway_id: i64,
    kind: ResourceKind,
    changes: &DraftChangeSet,
    now: NaiveDateTime,
) -> anyhow::Result<()> {
    let backend = txn.get_database_backend();
    for change in &changes.status_updates {
        for ids in change.ids.chunks(DB_BATCH_SIZE) {
            let stmt = draft::update_status(kind, gateway_id, change, ids, now);
            txn.execute(backend.build(&stmt)).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl ResourcePersistence for ExternalDbPersistService {
    async fn resource_find(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        filter: &DraftFilter,
    ) -> anyhow::Result<Vec<DraftRow>> {
        let Some(ids) = &filter.ids else {
            return self.select_drafts(gateway_id, kind, filter).await;
        };

        let mut rows = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(DB_BATCH_SIZE) {
            let chunk_filter = DraftFilter {
                ids: Some(chunk.to_vec()),
                ..filter.clone()
            };
            rows.extend(self.select_drafts(gateway_id, kind, &chunk_filter).await?);
        }
        Ok(rows)
    }

    async fn resource_search_page(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        filter: &DraftFilter,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<DraftRow>> {
        let backend = self.db.get_database_backend();
        let cond = draft::filter_condition(gateway_id, filter);

        let total = match self
            .db
            .query_one(backend.build(&draft::count(kind, cond.clone())))
            .await?
        {
            Some(row) => row.try_get::<i64>("", "total")? as u64,
            None => 0,
        };
        if total == 0 {
            return Ok(Page::new(0, page_no, page_size, Vec::new()));
        }

        let stmt = backend.build(&draft::select_page(kind, cond, page_no, page_size));
        let items = DraftRecord::find_by_statement(stmt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|record| record.into_row(kind))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Page::new(total, page_no, page_size, items))
    }

    async fn resource_find_referencing(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        relation: Relation,
        target_ids: &[String],
    ) -> anyhow::Result<Vec<DraftRow>> {
        let backend = self.db.get_database_backend();
        let mut rows = Vec::new();
        for chunk in target_ids.chunks(DB_BATCH_SIZE) {
            let cond = draft::filter_condition(gateway_id, &DraftFilter::all())
                .add(Expr::col(col(relation.column())).is_in(chunk.iter().cloned()));
            let stmt = backend.build(&draft::select(kind, cond));
            for record in DraftRecord::find_by_statement(stmt).all(&self.db).await? {
                rows.push(record.into_row(kind)?);
            }
        }
        Ok(rows)
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
        if changes.iter().all(|(_, set)| set.is_empty()) {
            return Ok(());
        }
        let now = Utc::now().naive_utc();
        let tx = self.db.begin().await?;
        for (kind, set) in changes {
            apply_draft_changes(&tx, gateway_id, kind, set, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn apply_draft_changes(
    txn: &DatabaseTransaction,
    gateway_id: i64,
    kind: ResourceKind,
    changes: DraftChangeSet,
    now: NaiveDateTime,
) -> anyhow::Result<()> {
    let backend = txn.get_database_backend();
    for chunk in changes.inserts.chunks(DB_BATCH_SIZE) {
        let stmt = draft::insert(kind, chunk)?;
        txn.execute(backend.build(&stmt)).await?;
    }
    for row in &changes.updates {
        txn.execute(backend.build(&draft::update_row(kind, row)))
            .await?;
    }
    apply_status_updates(txn, gateway_id, kind, &changes, now).await?;
    for chunk in changes.removals.chunks(DB_BATCH_SIZE) {
        txn.execute(backend.build(&draft::delete(kind, gateway_id, chunk)))
            .await?;
    }
    insert_audit_logs(txn, changes.audit_logs).await
}

// ============================================================================
// SyncDataPersistence implementation
// ============================================================================

fn to_sync_data_row(model: gateway_sync_data::Model) -> anyhow::Result<SyncDataRow> {
    Ok(SyncDataRow {
        kind: model.resource_type.parse()?,
        id: model.id,
        gateway_id: model.gateway_id,
        config: model.config,
        mod_revision: model.mod_revision,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

#[async_trait]
impl SyncDataPersistence for ExternalDbPersistService {
    async fn sync_data_find_all(
        &self,
        gateway_id: i64,
        kind: Option<ResourceKind>,
    ) -> anyhow::Result<Vec<SyncDataRow>> {
        let mut query = gateway_sync_data::Entity::find()
            .filter(gateway_sync_data::Column::GatewayId.eq(gateway_id));
        if let Some(kind) = kind {
            query = query.filter(gateway_sync_data::Column::ResourceType.eq(kind.as_str()));
        }
        query
            .order_by_asc(gateway_sync_data::Column::AutoId)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_sync_data_row)
            .collect()
    }

    async fn sync_data_find(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        id: &str,
    ) -> anyhow::Result<Option<SyncDataRow>> {
        gateway_sync_data::Entity::find()
            .filter(gateway_sync_data::Column::GatewayId.eq(gateway_id))
            .filter(gateway_sync_data::Column::ResourceType.eq(kind.as_str()))
            .filter(gateway_sync_data::Column::Id.eq(id))
            .one(&self.db)
            .await?
            .map(to_sync_data_row)
            .transpose()
    }

    async fn sync_data_apply(
        &self,
        gateway_id: i64,
        changes: SyncChangeSet,
        synced_at: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let tx = self.db.begin().await?;

        for chunk in changes.inserts.chunks(DB_BATCH_SIZE) {
            let models = chunk.iter().map(|row| gateway_sync_data::ActiveModel {
                id: Set(row.id.clone()),
                gateway_id: Set(gateway_id),
                resource_type: Set(row.kind.as_str().to_string()),
                config: Set(row.config.clone()),
                mod_revision: Set(row.mod_revision),
                created_at: Set(row.created_at),
                updated_at: Set(row.updated_at),
                ..Default::default()
            });
            gateway_sync_data::Entity::insert_many(models)
                .exec(&tx)
                .await?;
        }

        for row in &changes.updates {
            gateway_sync_data::Entity::update_many()
                .col_expr(gateway_sync_data::Column::Config, Expr::value(row.config.clone()))
                .col_expr(gateway_sync_data::Column::ModRevision, Expr::value(row.mod_revision))
                .col_expr(gateway_sync_data::Column::UpdatedAt, Expr::value(row.updated_at))
                .filter(gateway_sync_data::Column::GatewayId.eq(gateway_id))
                .filter(gateway_sync_data::Column::ResourceType.eq(row.kind.as_str()))
                .filter(gateway_sync_data::Column::Id.eq(row.id.as_str()))
                .exec(&tx)
                .await?;
        }

        let mut deletes: BTreeMap<ResourceKind, Vec<String>> = BTreeMap::new();
        for (kind, id) in changes.deletes {
            deletes.entry(kind).or_default().push(id);
        }
        for (kind, ids) in deletes {
            for chunk in ids.chunks(DB_BATCH_SIZE) {
                gateway_sync_data::Entity::delete_many()
                    .filter(gateway_sync_data::Column::GatewayId.eq(gateway_id))
                    .filter(gateway_sync_data::Column::ResourceType.eq(kind.as_str()))
                    .filter(gateway_sync_data::Column::Id.is_in(chunk.iter().cloned()))
                    .exec(&tx)
                    .await?;
            }
        }

        gateway::Entity::update_many()
            .col_expr(gateway::Column::LastSyncedAt, Expr::value(Some(synced_at)))
            .filter(gateway::Column::Id.eq(gateway_id))
            .exec(&tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// AuditPersistence implementation
// ============================================================================

async fn insert_audit_logs(
    tx: &DatabaseTransaction,
    records: Vec<AuditLogRecord>,
) -> anyhow::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let models = records
        .into_iter()
        .map(|record| operation_audit_log::ActiveModel {
            gateway_id: Set(record.gateway_id),
            operation_type: Set(record.operation_type.as_str().to_string()),
            operator: Set(record.operator),
            resource_ids: Set(record.resource_ids),
            resource_type: Set(record.resource_type.as_str().to_string()),
            data_before: Set(record.data_before),
            data_after: Set(record.data_after),
            created_at: Set(record.created_at),
            ..Default::default()
        });
    operation_audit_log::Entity::insert_many(models)
        .exec(tx)
        .await?;
    Ok(())
}

fn to_audit_record(model: operation_audit_log::Model) -> anyhow::Result<AuditLogRecord> {
    Ok(AuditLogRecord {
        resource_type: model.resource_type.parse()?,
        operation_type: model.operation_type.parse()?,
        id: model.id,
        gateway_id: model.gateway_id,
        resource_ids: model.resource_ids,
        data_before: model.data_before,
        data_after: model.data_after,
        operator: model.operator,
        created_at: model.created_at,
    })
}

#[async_trait]
impl AuditPersistence for ExternalDbPersistService {
    async fn audit_append(&self, records: Vec<AuditLogRecord>) -> anyhow::Result<()> {
        let tx = self.db.begin().await?;
        insert_audit_logs(&tx, records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn audit_search_page(
        &self,
        gateway_id: i64,
        filter: &AuditLogFilter,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<AuditLogRecord>> {
        let mut query = operation_audit_log::Entity::find()
            .filter(operation_audit_log::Column::GatewayId.eq(gateway_id));
        if let Some(kind) = filter.resource_type {
            query = query.filter(operation_audit_log::Column::ResourceType.eq(kind.as_str()));
        }
        if let Some(op) = filter.operation_type {
            query = query.filter(operation_audit_log::Column::OperationType.eq(op.as_str()));
        }
        if let Some(operator) = &filter.operator {
            query = query.filter(operation_audit_log::Column::Operator.eq(operator.as_str()));
        }
        if let Some(resource_id) = &filter.resource_id {
            query = query.filter(draft::id_list_contains(
                operation_audit_log::Column::ResourceIds,
                resource_id,
            ));
        }

        let paginator = query
            .order_by_desc(operation_audit_log::Column::Id)
            .paginate(&self.db, page_size.max(1));
        let total = paginator.num_items().await?;
        let items = paginator
            .fetch_page(page_no.saturating_sub(1))
            .await?
            .into_iter()
            .map(to_audit_record)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Page::new(total, page_no, page_size, items))
    }
}
