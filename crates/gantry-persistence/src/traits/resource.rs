//! Draft resource persistence trait
//!
//! Every kind has its own draft table with identical columns, so one trait
//! parameterized by [`ResourceKind`] covers all of them.

use async_trait::async_trait;
use gantry_common::{Relation, ResourceKind};

use crate::model::{DraftChangeSet, DraftFilter, DraftRow, Page};

#[async_trait]
pub trait ResourcePersistence: Send + Sync {
    /// Find draft rows of a kind matching the filter
    async fn resource_find(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        filter: &DraftFilter,
    ) -> anyhow::Result<Vec<DraftRow>>;

    /// Paginated search, newest update first. `page_no` starts at 1.
    async fn resource_search_page(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        filter: &DraftFilter,
        page_no: u64,
        page_size: u64,
    ) -> anyhow::Result<Page<DraftRow>>;

    /// Rows of `kind` whose `relation` column points at any of `target_ids`
    async fn resource_find_referencing(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        relation: Relation,
        target_ids: &[String],
    ) -> anyhow::Result<Vec<DraftRow>>;

    /// Apply a change set to one kind's table in a single transaction
    async fn resource_apply(
        &self,
        gateway_id: i64,
        kind: ResourceKind,
        changes: DraftChangeSet,
    ) -> anyhow::Result<()>;

    /// Apply change sets for several kinds in one transaction; nothing is
    /// written if any of them fails.
    async fn resource_apply_all(
        &self,
        gateway_id: i64,
        changes: Vec<(ResourceKind, DraftChangeSet)>,
    ) -> anyhow::Result<()>;
}
