//! The closed set of APISIX resource kinds managed by the control plane.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GantryError;
use crate::version::ApisixVersion;

const ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Route,
    Service,
    Upstream,
    PluginConfig,
    PluginMetadata,
    Consumer,
    ConsumerGroup,
    GlobalRule,
    Proto,
    Ssl,
    StreamRoute,
}

impl ResourceKind {
    /// Every kind, in the order used for whole-gateway iteration.
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Route,
        ResourceKind::Service,
        ResourceKind::Upstream,
        ResourceKind::PluginConfig,
        ResourceKind::PluginMetadata,
        ResourceKind::Consumer,
        ResourceKind::ConsumerGroup,
        ResourceKind::GlobalRule,
        ResourceKind::Proto,
        ResourceKind::Ssl,
        ResourceKind::StreamRoute,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Route => "route",
            ResourceKind::Service => "service",
            ResourceKind::Upstream => "upstream",
            ResourceKind::PluginConfig => "plugin_config",
            ResourceKind::PluginMetadata => "plugin_metadata",
            ResourceKind::Consumer => "consumer",
            ResourceKind::ConsumerGroup => "consumer_group",
            ResourceKind::GlobalRule => "global_rule",
            ResourceKind::Proto => "proto",
            ResourceKind::Ssl => "ssl",
            ResourceKind::StreamRoute => "stream_route",
        }
    }

    /// Key segment under the gateway prefix in etcd.
    pub fn etcd_segment(self) -> &'static str {
        match self {
            ResourceKind::Route => "routes",
            ResourceKind::Service => "services",
            ResourceKind::Upstream => "upstreams",
            ResourceKind::PluginConfig => "plugin_configs",
            // APISIX keeps this one singular
            ResourceKind::PluginMetadata => "plugin_metadata",
            ResourceKind::Consumer => "consumers",
            ResourceKind::ConsumerGroup => "consumer_groups",
            ResourceKind::GlobalRule => "global_rules",
            ResourceKind::Proto => "protos",
            ResourceKind::Ssl => "ssls",
            ResourceKind::StreamRoute => "stream_routes",
        }
    }

    pub fn from_etcd_segment(segment: &str) -> Option<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.etcd_segment() == segment)
    }

    /// Draft table holding this kind.
    pub fn table_name(self) -> &'static str {
        self.as_str()
    }

    fn id_prefix(self) -> &'static str {
        match self {
            ResourceKind::Route => "r",
            ResourceKind::Service => "s",
            ResourceKind::Upstream => "u",
            ResourceKind::PluginConfig => "pc",
            ResourceKind::PluginMetadata => "pm",
            ResourceKind::Consumer => "c",
            ResourceKind::ConsumerGroup => "cg",
            ResourceKind::GlobalRule => "gr",
            ResourceKind::Proto => "pb",
            ResourceKind::Ssl => "ss",
            ResourceKind::StreamRoute => "sr",
        }
    }

    /// Config field carrying the display name.
    pub fn name_field(self) -> &'static str {
        match self {
            ResourceKind::Consumer => "username",
            _ => "name",
        }
    }

    /// Soft references this kind may hold, which a publish forces first.
    pub fn relations(self) -> &'static [Relation] {
        match self {
            ResourceKind::Route => &[Relation::Service, Relation::Upstream, Relation::PluginConfig],
            ResourceKind::StreamRoute => &[Relation::Service, Relation::Upstream],
            ResourceKind::Service => &[Relation::Upstream],
            ResourceKind::Upstream => &[Relation::Ssl],
            ResourceKind::Consumer => &[Relation::ConsumerGroup],
            _ => &[],
        }
    }

    /// Kinds (and the relation they use) that may point at this kind.
    pub fn referenced_by(self) -> &'static [(ResourceKind, Relation)] {
        match self {
            ResourceKind::Service => &[
                (ResourceKind::Route, Relation::Service),
                (ResourceKind::StreamRoute, Relation::Service),
            ],
            ResourceKind::Upstream => &[
                (ResourceKind::Route, Relation::Upstream),
                (ResourceKind::Service, Relation::Upstream),
                (ResourceKind::StreamRoute, Relation::Upstream),
            ],
            ResourceKind::PluginConfig => &[(ResourceKind::Route, Relation::PluginConfig)],
            ResourceKind::ConsumerGroup => &[(ResourceKind::Consumer, Relation::ConsumerGroup)],
            ResourceKind::Ssl => &[(ResourceKind::Upstream, Relation::Ssl)],
            _ => &[],
        }
    }

    /// Whether the target version's schema accepts `field` for this kind.
    pub fn supports_field(self, field: &str, version: ApisixVersion) -> bool {
        match field {
            "id" => self != ResourceKind::Consumer,
            "name" => match self {
                ResourceKind::Route
                | ResourceKind::Service
                | ResourceKind::Upstream
                | ResourceKind::PluginConfig => true,
                ResourceKind::ConsumerGroup | ResourceKind::StreamRoute | ResourceKind::Proto => {
                    version >= ApisixVersion::V3_13
                }
                _ => false,
            },
            _ => true,
        }
    }

    /// Mints a fresh opaque ID, e.g. `bk.r.Xq3...`.
    pub fn generate_id(self) -> String {
        let (high, low) = uuid::Uuid::new_v4().as_u64_pair();
        let mut token = String::with_capacity(22);
        for mut part in [high, low] {
            for _ in 0..11 {
                token.push(ID_CHARSET[(part & 0x3f) as usize] as char);
                part >>= 6;
            }
        }
        format!("bk.{}.{}", self.id_prefix(), token)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| GantryError::Validation(format!("unknown resource type '{}'", s)))
    }
}

/// Soft foreign key from one kind to another, mirrored as a draft column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Service,
    Upstream,
    PluginConfig,
    ConsumerGroup,
    Ssl,
}

impl Relation {
    pub fn target(self) -> ResourceKind {
        match self {
            Relation::Service => ResourceKind::Service,
            Relation::Upstream => ResourceKind::Upstream,
            Relation::PluginConfig => ResourceKind::PluginConfig,
            Relation::ConsumerGroup => ResourceKind::ConsumerGroup,
            Relation::Ssl => ResourceKind::Ssl,
        }
    }

    /// Denormalized draft column.
    pub fn column(self) -> &'static str {
        match self {
            Relation::Service => "service_id",
            Relation::Upstream => "upstream_id",
            Relation::PluginConfig => "plugin_config_id",
            Relation::ConsumerGroup => "group_id",
            Relation::Ssl => "ssl_id",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_lookup() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_etcd_segment(kind.etcd_segment()), Some(kind));
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert_eq!(
            ResourceKind::from_etcd_segment("plugin_metadata"),
            Some(ResourceKind::PluginMetadata)
        );
        assert_eq!(ResourceKind::from_etcd_segment("plugin_metadatas"), None);
        assert!("routes".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_generate_id_shape() {
        let id = ResourceKind::ConsumerGroup.generate_id();
        assert!(id.starts_with("bk.cg."));
        let token = &id["bk.cg.".len()..];
        assert_eq!(token.len(), 22);
        assert!(token.bytes().all(|b| ID_CHARSET.contains(&b)));
        assert_ne!(id, ResourceKind::ConsumerGroup.generate_id());
    }

    #[test]
    fn test_name_support_by_version() {
        assert!(ResourceKind::Route.supports_field("name", ApisixVersion::V3_2));
        assert!(!ResourceKind::StreamRoute.supports_field("name", ApisixVersion::V3_11));
        assert!(ResourceKind::StreamRoute.supports_field("name", ApisixVersion::V3_13));
        assert!(!ResourceKind::Ssl.supports_field("name", ApisixVersion::V3_13));
        assert!(!ResourceKind::Consumer.supports_field("id", ApisixVersion::V3_13));
        assert!(ResourceKind::Consumer.supports_field("plugins", ApisixVersion::V3_2));
    }

    #[test]
    fn test_relations_are_symmetric() {
        for kind in ResourceKind::ALL {
            for relation in kind.relations() {
                assert!(
                    relation
                        .target()
                        .referenced_by()
                        .contains(&(kind, *relation)),
                    "{kind} -> {:?} missing reverse entry",
                    relation
                );
            }
        }
    }
}
