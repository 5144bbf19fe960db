//! Error types and error codes for Gantry
//!
//! This module defines:
//! - `GantryError`: the error taxonomy every control-plane flow reports through
//! - `ErrorCode`: structured error codes for API responses

use serde::{Deserialize, Serialize};

use crate::resource::ResourceKind;
use crate::status::{OperationType, ResourceStatus};

pub type Result<T> = std::result::Result<T, GantryError>;

/// Control-plane error taxonomy
#[derive(thiserror::Error, Debug)]
pub enum GantryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(
        "illegal transition: resource '{resource_id}' in status '{}' cannot {operation}",
        .current.map_or("absent", |s| s.as_str())
    )]
    IllegalTransition {
        resource_id: String,
        current: Option<ResourceStatus>,
        operation: OperationType,
    },

    #[error("{what} not found: [{}]", .ids.join(","))]
    NotFound { what: String, ids: Vec<String> },

    #[error("dependency error on {kind} [{}]: {reason}", .ids.join(","))]
    Dependency {
        kind: ResourceKind,
        ids: Vec<String>,
        reason: String,
    },

    #[error("etcd error: {0}")]
    Etcd(String),

    #[error("partial failure on {kind} [{}]: etcd updated but {reason}", .ids.join(","))]
    PartialFailure {
        kind: ResourceKind,
        ids: Vec<String>,
        reason: String,
    },

    #[error("no synced snapshot for {kind} [{}]", .ids.join(","))]
    NoSyncedSnapshot { kind: ResourceKind, ids: Vec<String> },

    #[error("gateway '{0}' is read only")]
    GatewayReadOnly(String),

    #[error("database error: {0}")]
    Database(String),
}

impl GantryError {
    pub fn not_found(kind: ResourceKind, ids: Vec<String>) -> Self {
        GantryError::NotFound {
            what: kind.to_string(),
            ids,
        }
    }

    pub fn gateway_not_found(gateway_id: i64) -> Self {
        GantryError::NotFound {
            what: "gateway".to_string(),
            ids: vec![gateway_id.to_string()],
        }
    }

    /// Taxonomy label surfaced to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            GantryError::Validation(_) => "ValidationError",
            GantryError::IllegalTransition { .. } => "IllegalTransition",
            GantryError::NotFound { .. } => "NotFound",
            GantryError::Dependency { .. } => "DependencyError",
            GantryError::Etcd(_) => "EtcdError",
            GantryError::PartialFailure { .. } => "PartialFailure",
            GantryError::NoSyncedSnapshot { .. } => "NoSyncedSnapshot",
            GantryError::GatewayReadOnly(_) => "GatewayReadOnly",
            GantryError::Database(_) => "DatabaseError",
        }
    }

    pub fn code(&self) -> ErrorCode<'static> {
        match self {
            GantryError::Validation(_) => PARAMETER_VALIDATE_ERROR,
            GantryError::IllegalTransition { .. } => ILLEGAL_TRANSITION,
            GantryError::NotFound { .. } => RESOURCE_NOT_FOUND,
            GantryError::Dependency { .. } => DEPENDENCY_ERROR,
            GantryError::Etcd(_) => ETCD_ERROR,
            GantryError::PartialFailure { .. } => PARTIAL_FAILURE,
            GantryError::NoSyncedSnapshot { .. } => NO_SYNCED_SNAPSHOT,
            GantryError::GatewayReadOnly(_) => GATEWAY_READ_ONLY,
            GantryError::Database(_) => DATA_ACCESS_ERROR,
        }
    }

    /// Resource IDs the failure concerns, if any.
    pub fn resource_ids(&self) -> &[String] {
        match self {
            GantryError::IllegalTransition { resource_id, .. } => std::slice::from_ref(resource_id),
            GantryError::NotFound { ids, .. }
            | GantryError::Dependency { ids, .. }
            | GantryError::PartialFailure { ids, .. }
            | GantryError::NoSyncedSnapshot { ids, .. } => ids,
            _ => &[],
        }
    }
}

/// Storage backends report through `anyhow`; a wrapped `GantryError` keeps
/// its taxonomy, anything else is a database failure.
impl From<anyhow::Error> for GantryError {
    fn from(value: anyhow::Error) -> Self {
        match value.downcast::<GantryError>() {
            Ok(err) => err,
            Err(other) => GantryError::Database(format!("{:#}", other)),
        }
    }
}

impl From<serde_json::Error> for GantryError {
    fn from(value: serde_json::Error) -> Self {
        GantryError::Validation(format!("invalid json: {}", value))
    }
}

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const DATA_ACCESS_ERROR: ErrorCode<'static> = ErrorCode {
    code: 10002,
    message: "data access error",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const ILLEGAL_TRANSITION: ErrorCode<'static> = ErrorCode {
    code: 30001,
    message: "illegal status transition",
};

pub const DEPENDENCY_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30002,
    message: "resource dependency error",
};

pub const NO_SYNCED_SNAPSHOT: ErrorCode<'static> = ErrorCode {
    code: 30003,
    message: "resource has no synced snapshot",
};

pub const GATEWAY_READ_ONLY: ErrorCode<'static> = ErrorCode {
    code: 30004,
    message: "gateway is read only",
};

pub const ETCD_ERROR: ErrorCode<'static> = ErrorCode {
    code: 40001,
    message: "etcd error",
};

pub const PARTIAL_FAILURE: ErrorCode<'static> = ErrorCode {
    code: 40002,
    message: "publish partially applied",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gantry_error_display() {
        let err = GantryError::Validation("config must be an object".to_string());
        assert_eq!(format!("{}", err), "validation error: config must be an object");

        let err = GantryError::IllegalTransition {
            resource_id: "r1".to_string(),
            current: Some(ResourceStatus::Success),
            operation: OperationType::Publish,
        };
        assert_eq!(
            format!("{}", err),
            "illegal transition: resource 'r1' in status 'success' cannot publish"
        );

        let err = GantryError::IllegalTransition {
            resource_id: "r2".to_string(),
            current: None,
            operation: OperationType::Revert,
        };
        assert!(format!("{}", err).contains("'absent'"));

        let err = GantryError::not_found(ResourceKind::Route, vec!["a".into(), "b".into()]);
        assert_eq!(format!("{}", err), "route not found: [a,b]");
    }

    #[test]
    fn test_error_kind_and_ids() {
        let err = GantryError::NoSyncedSnapshot {
            kind: ResourceKind::Upstream,
            ids: vec!["u1".to_string()],
        };
        assert_eq!(err.kind(), "NoSyncedSnapshot");
        assert_eq!(err.resource_ids(), ["u1".to_string()]);
        assert_eq!(err.code().code, NO_SYNCED_SNAPSHOT.code);
        assert!(GantryError::Etcd("down".into()).resource_ids().is_empty());
    }

    #[test]
    fn test_from_anyhow_keeps_taxonomy() {
        let wrapped = anyhow::Error::new(GantryError::GatewayReadOnly("gw".to_string()));
        assert!(matches!(
            GantryError::from(wrapped),
            GantryError::GatewayReadOnly(_)
        ));

        let plain = anyhow::anyhow!("connection reset");
        match GantryError::from(plain) {
            GantryError::Database(msg) => assert_eq!(msg, "connection reset"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
