use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{GantryError, Result};
use crate::resource::ResourceKind;
use crate::version::ApisixVersion;

/// Connection settings for a gateway's etcd cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl EtcdConfig {
    /// Prefix without trailing slash, always rooted at `/`.
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.prefix.trim().trim_end_matches('/');
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }
}

/// A managed APISIX gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub id: i64,
    pub name: String,
    pub apisix_type: String,
    pub apisix_version: String,
    pub etcd: EtcdConfig,
    pub read_only: bool,
    pub last_synced_at: Option<NaiveDateTime>,
}

impl GatewayInfo {
    pub fn version(&self) -> ApisixVersion {
        ApisixVersion::parse_lenient(&self.apisix_version)
    }

    pub fn etcd_prefix(&self) -> String {
        self.etcd.normalized_prefix()
    }

    /// `{prefix}/{segment}`, the range every key of `kind` lives under.
    pub fn resource_prefix(&self, kind: ResourceKind) -> String {
        format!("{}/{}", self.etcd_prefix(), kind.etcd_segment())
    }

    pub fn resource_key(&self, kind: ResourceKind, key: &str) -> String {
        format!("{}/{}/{}", self.etcd_prefix(), kind.etcd_segment(), key)
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(GantryError::GatewayReadOnly(self.name.clone()));
        }
        Ok(())
    }
}
