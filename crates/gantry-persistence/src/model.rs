//! Domain model types for the persistence abstraction layer
//!
//! These types are used as arguments and return values of the persistence
//! traits, decoupled from specific storage backends.

use chrono::NaiveDateTime;
use gantry_common::{OperationType, Relation, ResourceKind, ResourceStatus};
use serde::{Deserialize, Serialize};

/// One row of a per-kind draft table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRow {
    pub id: String,
    pub gateway_id: i64,
    pub kind: ResourceKind,
    pub name: String,
    /// Raw APISIX JSON payload.
    pub config: String,
    pub status: ResourceStatus,
    pub service_id: Option<String>,
    pub upstream_id: Option<String>,
    pub plugin_config_id: Option<String>,
    pub group_id: Option<String>,
    pub ssl_id: Option<String>,
    pub operation_type: Option<OperationType>,
    pub creator: String,
    pub updater: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DraftRow {
    pub fn relation(&self, relation: Relation) -> Option<&str> {
        let value = match relation {
            Relation::Service => &self.service_id,
            Relation::Upstream => &self.upstream_id,
            Relation::PluginConfig => &self.plugin_config_id,
            Relation::ConsumerGroup => &self.group_id,
            Relation::Ssl => &self.ssl_id,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    pub fn set_relation(&mut self, relation: Relation, value: Option<String>) {
        let slot = match relation {
            Relation::Service => &mut self.service_id,
            Relation::Upstream => &mut self.upstream_id,
            Relation::PluginConfig => &mut self.plugin_config_id,
            Relation::ConsumerGroup => &mut self.group_id,
            Relation::Ssl => &mut self.ssl_id,
        };
        *slot = value.filter(|v| !v.is_empty());
    }
}

/// Row selection on a draft table. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct DraftFilter {
    pub ids: Option<Vec<String>>,
    pub names: Option<Vec<String>>,
    pub statuses: Option<Vec<ResourceStatus>>,
    /// Substring match on the name column.
    pub name_contains: Option<String>,
}

impl DraftFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_ids(ids: &[String]) -> Self {
        Self {
            ids: Some(ids.to_vec()),
            ..Default::default()
        }
    }

    pub fn by_names(names: &[String]) -> Self {
        Self {
            names: Some(names.to_vec()),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[ResourceStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn matches(&self, row: &DraftRow) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&row.id))
            && self.names.as_ref().is_none_or(|names| names.contains(&row.name))
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&row.status))
            && self
                .name_contains
                .as_ref()
                .is_none_or(|needle| row.name.contains(needle.as_str()))
    }
}

/// Status flip applied to a set of draft rows.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub ids: Vec<String>,
    pub status: ResourceStatus,
    pub operation_type: Option<OperationType>,
    pub updater: String,
}

/// Writes to one kind's draft table, committed atomically together with
/// their audit entries.
#[derive(Debug, Clone, Default)]
pub struct DraftChangeSet {
    pub inserts: Vec<DraftRow>,
    /// Full-row overwrites keyed by ID.
    pub updates: Vec<DraftRow>,
    pub status_updates: Vec<StatusUpdate>,
    /// IDs to remove physically.
    pub removals: Vec<String>,
    pub audit_logs: Vec<AuditLogRecord>,
}

impl DraftChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.status_updates.is_empty()
            && self.removals.is_empty()
            && self.audit_logs.is_empty()
    }
}

/// Last observed etcd state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDataRow {
    pub id: String,
    pub gateway_id: i64,
    pub kind: ResourceKind,
    pub config: String,
    pub mod_revision: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// One reconciliation cycle's writes to the snapshot table.
#[derive(Debug, Clone, Default)]
pub struct SyncChangeSet {
    pub inserts: Vec<SyncDataRow>,
    pub updates: Vec<SyncDataRow>,
    pub deletes: Vec<(ResourceKind, String)>,
}

impl SyncChangeSet {
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogRecord {
    pub id: i64,
    pub gateway_id: i64,
    pub resource_type: ResourceKind,
    pub operation_type: OperationType,
    /// Comma-joined resource IDs.
    pub resource_ids: String,
    pub data_before: String,
    pub data_after: String,
    pub operator: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub resource_type: Option<ResourceKind>,
    pub operation_type: Option<OperationType>,
    pub operator: Option<String>,
    pub resource_id: Option<String>,
}

impl AuditLogFilter {
    pub fn matches(&self, record: &AuditLogRecord) -> bool {
        self.resource_type.is_none_or(|t| t == record.resource_type)
            && self.operation_type.is_none_or(|t| t == record.operation_type)
            && self.operator.as_ref().is_none_or(|o| *o == record.operator)
            && self
                .resource_id
                .as_ref()
                .is_none_or(|id| record.resource_ids.split(',').any(|r| r == id))
    }
}

/// Generic paginated result
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_count: u64,
    pub page_number: u64,
    pub pages_available: u64,
    pub page_items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(total_count: u64, page_number: u64, page_size: u64, page_items: Vec<T>) -> Self {
        Self {
            total_count,
            page_number,
            pages_available: if page_size > 0 {
                total_count.div_ceil(page_size)
            } else {
                0
            },
            page_items,
        }
    }

    /// Slices an in-memory result set; `page_number` starts at 1.
    pub fn slice(items: Vec<T>, page_number: u64, page_size: u64) -> Self {
        let total = items.len() as u64;
        let skip = page_number.saturating_sub(1).saturating_mul(page_size) as usize;
        let page_items = items
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .collect();
        Self::new(total, page_number, page_size, page_items)
    }
}

/// Storage mode for the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// External database (MySQL/PostgreSQL via SeaORM)
    ExternalDb,
    /// In-process tables, lost on restart
    Memory,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::ExternalDb => write!(f, "external_db"),
            StorageMode::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external_db" => Ok(StorageMode::ExternalDb),
            "memory" => Ok(StorageMode::Memory),
            _ => Err(format!("Invalid storage mode: {}", s)),
        }
    }
}
