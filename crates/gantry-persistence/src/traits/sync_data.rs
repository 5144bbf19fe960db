//! Synced snapshot persistence trait

use async_trait::async_trait;
use chrono::NaiveDateTime;
use gantry_common::ResourceKind;

use crate::model::{SyncChangeSet, SyncDataRow};

#[async_trait]
pub trait SyncDataPersistence: Send + Sync {
    /// All snapshot rows of a gateway, optionally restricted to one kind
    async fn sync_data_find_all(
        &self,
        gateway_id: i64,
        kind: Option<ResourceKind>,
    ) -> anyhow::Result<Vec<SyncDataRow>>;

    async fn sync_data_find(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        id: &str,
    ) -> anyhow::Result<Option<SyncDataRow>>;

    /// Apply one reconciliation cycle and stamp the gateway's last sync time,
    /// all in one transaction
    async fn sync_data_apply(
        &self,
        gateway_id: i64,
        changes: SyncChangeSet,
        synced_at: NaiveDateTime,
    ) -> anyhow::Result<()>;
}
