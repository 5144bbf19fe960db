//! Typed view of an APISIX resource payload.
//!
//! Fields the control plane reads or rewrites are typed; everything else is
//! carried untouched in [`ResourceDocument::extra`] so payloads from newer
//! APISIX releases round-trip.

use std::collections::BTreeMap;

use gantry_common::{GantryError, Relation, ResourceKind, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_id")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_id")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_id")]
    pub upstream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_id")]
    pub plugin_config_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_id")]
    pub group_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "loose_timestamp"
    )]
    pub create_time: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "loose_timestamp"
    )]
    pub update_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// APISIX accepts numeric IDs; they are handled as strings.
fn loose_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

fn loose_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => Ok(n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))),
        Some(Value::String(s)) => Ok(s.parse().ok()),
        _ => Ok(None),
    }
}

impl ResourceDocument {
    /// Parses a raw payload, which must be a JSON object.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(GantryError::Validation(
                "resource config must be a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Canonical serialization stored in draft and snapshot rows.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// `username` for consumers, `name` for everything else.
    pub fn display_name(&self, kind: ResourceKind) -> Option<&str> {
        let name = match kind {
            ResourceKind::Consumer => self.username.as_deref(),
            _ => self.name.as_deref(),
        };
        name.filter(|n| !n.is_empty())
    }

    pub fn set_display_name(&mut self, kind: ResourceKind, name: impl Into<String>) {
        match kind {
            ResourceKind::Consumer => self.username = Some(name.into()),
            _ => self.name = Some(name.into()),
        }
    }

    pub fn relation(&self, relation: Relation) -> Option<&str> {
        let value = match relation {
            Relation::Service => self.service_id.as_deref(),
            Relation::Upstream => self.upstream_id.as_deref(),
            Relation::PluginConfig => self.plugin_config_id.as_deref(),
            Relation::ConsumerGroup => self.group_id.as_deref(),
            Relation::Ssl => self
                .extra
                .get("tls")
                .and_then(|tls| tls.get("client_cert_id"))
                .and_then(Value::as_str),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Drops the timestamps etcd carries but drafts do not.
    pub fn strip_timestamps(&mut self) {
        self.create_time = None;
        self.update_time = None;
    }

    pub fn remove_field(&mut self, field: &str) {
        match field {
            "id" => self.id = None,
            "name" => self.name = None,
            "username" => self.username = None,
            "labels" => self.labels = None,
            "service_id" => self.service_id = None,
            "upstream_id" => self.upstream_id = None,
            "plugin_config_id" => self.plugin_config_id = None,
            "group_id" => self.group_id = None,
            "create_time" => self.create_time = None,
            "update_time" => self.update_time = None,
            other => {
                self.extra.remove(other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_round_trip() {
        let raw = r#"{"uri":"/a","plugins":{"limit-count":{"count":2}},"name":"r1","id":"r1"}"#;
        let doc = ResourceDocument::parse(raw).unwrap();
        assert_eq!(doc.name.as_deref(), Some("r1"));
        assert_eq!(doc.extra["uri"], json!("/a"));

        let back: Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        assert_eq!(back, serde_json::from_str::<Value>(raw).unwrap());
    }

    #[test]
    fn test_numeric_ids_become_strings() {
        let doc = ResourceDocument::parse(r#"{"id":42,"upstream_id":7,"create_time":1700000000}"#)
            .unwrap();
        assert_eq!(doc.id.as_deref(), Some("42"));
        assert_eq!(doc.relation(Relation::Upstream), Some("7"));
        assert_eq!(doc.create_time, Some(1_700_000_000));
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            ResourceDocument::parse("[1,2]"),
            Err(GantryError::Validation(_))
        ));
        assert!(matches!(
            ResourceDocument::parse("not json"),
            Err(GantryError::Validation(_))
        ));
    }

    #[test]
    fn test_ssl_relation_reads_client_cert() {
        let doc = ResourceDocument::parse(
            r#"{"nodes":{"a:80":1},"tls":{"client_cert_id":"ss1","client_key":"k"}}"#,
        )
        .unwrap();
        assert_eq!(doc.relation(Relation::Ssl), Some("ss1"));
    }

    #[test]
    fn test_display_name_by_kind() {
        let mut doc = ResourceDocument::parse(r#"{"username":"jack","name":"ignored"}"#).unwrap();
        assert_eq!(doc.display_name(ResourceKind::Consumer), Some("jack"));
        assert_eq!(doc.display_name(ResourceKind::Route), Some("ignored"));
        doc.set_display_name(ResourceKind::Route, "");
        assert_eq!(doc.display_name(ResourceKind::Route), None);
    }

    #[test]
    fn test_strip_and_remove() {
        let mut doc = ResourceDocument::parse(
            r#"{"id":"x","name":"n","create_time":1,"update_time":2,"desc":"d"}"#,
        )
        .unwrap();
        doc.strip_timestamps();
        doc.remove_field("name");
        doc.remove_field("desc");
        assert_eq!(doc.to_value(), json!({"id": "x"}));
    }
}
