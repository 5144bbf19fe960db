//! Per-kind capabilities.
//!
//! Each resource kind gets one unit struct implementing
//! [`ResourceCapability`]; [`capability`] dispatches on [`ResourceKind`]
//! through a static table so every call site handles all kinds uniformly.

use chrono::NaiveDateTime;
use gantry_common::{ApisixVersion, ResourceKind, ResourceStatus, Result};
use gantry_persistence::DraftRow;

use crate::document::ResourceDocument;

pub trait ResourceCapability: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn table_name(&self) -> &'static str {
        self.kind().table_name()
    }

    fn name_of<'a>(&self, doc: &'a ResourceDocument) -> Option<&'a str> {
        doc.display_name(self.kind())
    }

    /// Resources this document references, in relation order.
    fn associated_ids(&self, doc: &ResourceDocument) -> Vec<(ResourceKind, String)> {
        self.kind()
            .relations()
            .iter()
            .filter_map(|relation| {
                doc.relation(*relation)
                    .map(|id| (relation.target(), id.to_string()))
            })
            .collect()
    }

    fn to_draft_row(
        &self,
        gateway_id: i64,
        id: &str,
        doc: &ResourceDocument,
        status: ResourceStatus,
        operator: &str,
        now: NaiveDateTime,
    ) -> Result<DraftRow> {
        let mut row = DraftRow {
            id: id.to_string(),
            gateway_id,
            kind: self.kind(),
            name: String::new(),
            config: String::new(),
            status,
            service_id: None,
            upstream_id: None,
            plugin_config_id: None,
            group_id: None,
            ssl_id: None,
            operation_type: None,
            creator: operator.to_string(),
            updater: operator.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.refresh_row(&mut row, doc)?;
        Ok(row)
    }

    /// Rewrites config, name and relation columns from `doc`.
    fn refresh_row(&self, row: &mut DraftRow, doc: &ResourceDocument) -> Result<()> {
        row.config = doc.to_json()?;
        row.name = self.name_of(doc).unwrap_or_default().to_string();
        for relation in self.kind().relations() {
            row.set_relation(*relation, doc.relation(*relation).map(str::to_string));
        }
        Ok(())
    }

    /// Last key segment the row is published under.
    fn etcd_key(&self, row: &DraftRow) -> String {
        row.id.clone()
    }

    /// Restores fields etcd payloads lack but drafts carry.
    fn enrich(&self, _doc: &mut ResourceDocument, _draft: Option<&DraftRow>) {}

    /// Payload written to etcd for `row` on the given APISIX version.
    fn prepare_payload(&self, row: &DraftRow, version: ApisixVersion) -> Result<ResourceDocument> {
        let kind = self.kind();
        let mut doc = ResourceDocument::parse(&row.config)?;
        doc.id = Some(self.etcd_key(row));
        doc.create_time = Some(row.created_at.and_utc().timestamp());
        doc.update_time = Some(row.updated_at.and_utc().timestamp());
        for field in ["id", "name"] {
            if !kind.supports_field(field, version) {
                doc.remove_field(field);
            }
        }
        Ok(doc)
    }
}

fn inject_name(doc: &mut ResourceDocument, draft: Option<&DraftRow>) {
    if doc.name.as_deref().is_none_or(str::is_empty)
        && let Some(row) = draft.filter(|row| !row.name.is_empty())
    {
        doc.name = Some(row.name.clone());
    }
}

macro_rules! plain_capability {
    ($($name:ident => $kind:expr),* $(,)?) => {
        $(
            pub struct $name;

            impl ResourceCapability for $name {
                fn kind(&self) -> ResourceKind {
                    $kind
                }
            }
        )*
    };
}

plain_capability! {
    RouteCapability => ResourceKind::Route,
    ServiceCapability => ResourceKind::Service,
    UpstreamCapability => ResourceKind::Upstream,
    ConsumerCapability => ResourceKind::Consumer,
    SslCapability => ResourceKind::Ssl,
}

/// Global rules, plugin configs and protos only carry `name` on newer
/// APISIX releases.
macro_rules! named_capability {
    ($($name:ident => $kind:expr),* $(,)?) => {
        $(
            pub struct $name;

            impl ResourceCapability for $name {
                fn kind(&self) -> ResourceKind {
                    $kind
                }

                fn enrich(&self, doc: &mut ResourceDocument, draft: Option<&DraftRow>) {
                    inject_name(doc, draft);
                }
            }
        )*
    };
}

named_capability! {
    GlobalRuleCapability => ResourceKind::GlobalRule,
    PluginConfigCapability => ResourceKind::PluginConfig,
    ProtoCapability => ResourceKind::Proto,
}

pub struct ConsumerGroupCapability;

impl ResourceCapability for ConsumerGroupCapability {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ConsumerGroup
    }

    fn enrich(&self, doc: &mut ResourceDocument, draft: Option<&DraftRow>) {
        inject_name(doc, draft);
        if doc.id.is_none()
            && let Some(row) = draft
        {
            doc.id = Some(row.id.clone());
        }
    }
}

pub struct StreamRouteCapability;

impl ResourceCapability for StreamRouteCapability {
    fn kind(&self) -> ResourceKind {
        ResourceKind::StreamRoute
    }

    fn enrich(&self, doc: &mut ResourceDocument, draft: Option<&DraftRow>) {
        inject_name(doc, draft);
        if doc.labels.is_none()
            && let Some(row) = draft
            && let Ok(draft_doc) = ResourceDocument::parse(&row.config)
        {
            doc.labels = draft_doc.labels;
        }
    }
}

/// Plugin metadata is keyed by plugin name; the draft row keeps an opaque
/// ID and stores the plugin name as `name`.
pub struct PluginMetadataCapability;

impl ResourceCapability for PluginMetadataCapability {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PluginMetadata
    }

    fn etcd_key(&self, row: &DraftRow) -> String {
        row.name.clone()
    }
}

static REGISTRY: [&'static dyn ResourceCapability; 11] = [
    &RouteCapability,
    &ServiceCapability,
    &UpstreamCapability,
    &PluginConfigCapability,
    &PluginMetadataCapability,
    &ConsumerCapability,
    &ConsumerGroupCapability,
    &GlobalRuleCapability,
    &ProtoCapability,
    &SslCapability,
    &StreamRouteCapability,
];

pub fn capability(kind: ResourceKind) -> &'static dyn ResourceCapability {
    REGISTRY[kind as usize]
}
