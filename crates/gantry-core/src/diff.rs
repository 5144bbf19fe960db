//! Publish previews
//!
//! A diff lists the pending drafts a publish would push, including the
//! pending dependencies a selected resource would drag along.

use std::collections::BTreeMap;

use gantry_common::{GantryError, OperationType, ResourceKind, ResourceStatus, Result};
use gantry_persistence::{DraftFilter, ResourcePersistence, SyncDataPersistence};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::draft::load_exact;
use crate::service::GatewayScope;
use crate::status::StatusMachine;

/// Dependents before dependencies: by the time a kind is visited, every kind
/// that could reference it has already contributed its IDs.
const WALK_ORDER: [ResourceKind; 11] = [
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

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRequest {
    /// Kind the selection is about; `None` diffs every kind.
    pub kind: Option<ResourceKind>,
    /// IDs of `kind`; empty selects every draft of it.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Name substring filter on `kind`.
    pub name: Option<String>,
    /// Status filter on `kind`, intersected with the draft statuses.
    #[serde(default)]
    pub statuses: Vec<ResourceStatus>,
    #[serde(default)]
    pub diff_all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChangeDetail {
    pub resource_id: String,
    pub name: String,
    pub before_status: ResourceStatus,
    pub after_status: ResourceStatus,
    pub publish_from: OperationType,
    /// Unix seconds.
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChangeInfo {
    pub resource_type: ResourceKind,
    pub added_count: usize,
    pub updated_count: usize,
    pub deleted_count: usize,
    pub change_detail: Vec<ResourceChangeDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDiffDetail {
    pub etcd_config: Value,
    pub editor_config: Value,
}

enum Selection {
    All,
    Ids(Vec<String>),
}

pub struct DiffEngine<'a> {
    scope: &'a GatewayScope,
}

impl<'a> DiffEngine<'a> {
    pub(crate) fn new(scope: &'a GatewayScope) -> Self {
        Self { scope }
    }

    pub async fn diff_resources(&self, request: &DiffRequest) -> Result<Vec<ResourceChangeInfo>> {
        let gateway_id = self.scope.ctx.gateway_id();
        let mut selections: BTreeMap<ResourceKind, Selection> = BTreeMap::new();
        for kind in ResourceKind::ALL {
            let selection = match request.kind {
                None => Some(Selection::All),
                Some(requested) if requested == kind && request.ids.is_empty() => {
                    Some(Selection::All)
                }
                Some(requested) if requested == kind => Some(Selection::Ids(request.ids.clone())),
                Some(_) if request.diff_all => Some(Selection::All),
                Some(_) => None,
            };
            if let Some(selection) = selection {
                selections.insert(kind, selection);
            }
        }

        let mut results: BTreeMap<ResourceKind, ResourceChangeInfo> = BTreeMap::new();
        for kind in WALK_ORDER {
            let mut filter = DraftFilter::all();
            match selections.get(&kind) {
                None => continue,
                Some(Selection::Ids(ids)) if ids.is_empty() => continue,
                Some(Selection::Ids(ids)) => filter.ids = Some(ids.clone()),
                Some(Selection::All) => {}
            }
            let mut statuses = ResourceStatus::DRAFTS.to_vec();
            if request.kind == Some(kind) {
                if !request.statuses.is_empty() {
                    statuses.retain(|status| request.statuses.contains(status));
                }
                filter.name_contains = request.name.clone().filter(|name| !name.is_empty());
            }
            if statuses.is_empty() {
                continue;
            }
            let filter = filter.with_statuses(&statuses);

            let rows = self
                .scope
                .persistence
                .resource_find(gateway_id, kind, &filter)
                .await?;
            if rows.is_empty() {
                continue;
            }

            let mut info = ResourceChangeInfo {
                resource_type: kind,
                added_count: 0,
                updated_count: 0,
                deleted_count: 0,
                change_detail: Vec::with_capacity(rows.len()),
            };
            for row in &rows {
                let after_status = StatusMachine::for_row(row).next_status(OperationType::Publish)?;
                let publish_from = match row.status {
                    ResourceStatus::CreateDraft => {
                        info.added_count += 1;
                        OperationType::Create
                    }
                    ResourceStatus::DeleteDraft => {
                        info.deleted_count += 1;
                        OperationType::Delete
                    }
                    _ => {
                        info.updated_count += 1;
                        OperationType::Update
                    }
                };
                info.change_detail.push(ResourceChangeDetail {
                    resource_id: row.id.clone(),
                    name: row.name.clone(),
                    before_status: row.status,
                    after_status,
                    publish_from,
                    updated_at: row.updated_at.and_utc().timestamp(),
                });

                for relation in kind.relations() {
                    let Some(id) = row.relation(*relation) else {
                        continue;
                    };
                    let target = selections
                        .entry(relation.target())
                        .or_insert_with(|| Selection::Ids(Vec::new()));
                    if let Selection::Ids(ids) = target
                        && !ids.iter().any(|known| known == id)
                    {
                        ids.push(id.to_string());
                    }
                }
            }
            results.insert(kind, info);
        }

        Ok(ResourceKind::ALL
            .into_iter()
            .filter_map(|kind| results.remove(&kind))
            .collect())
    }

    /// Synced config against the draft config of one resource.
    pub async fn resource_config_diff_detail(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<ResourceDiffDetail> {
        let gateway_id = self.scope.ctx.gateway_id();
        let draft = load_exact(
            self.scope.persistence.as_ref(),
            gateway_id,
            kind,
            &[id.to_string()],
        )
        .await?
        .pop()
        .ok_or_else(|| GantryError::not_found(kind, vec![id.to_string()]))?;

        let mut etcd_config = match self
            .scope
            .persistence
            .sync_data_find(gateway_id, kind, id)
            .await?
        {
            Some(row) => serde_json::from_str(&row.config)?,
            None => Value::Object(Map::new()),
        };
        let mut editor_config = match draft.status {
            ResourceStatus::DeleteDraft => Value::Object(Map::new()),
            _ => serde_json::from_str(&draft.config)?,
        };

        if kind == ResourceKind::PluginMetadata {
            for config in [&mut etcd_config, &mut editor_config] {
                if let Some(object) = config.as_object_mut() {
                    object.remove("name");
                }
            }
        }
        Ok(ResourceDiffDetail {
            etcd_config,
            editor_config,
        })
    }
}
