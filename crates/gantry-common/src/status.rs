use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GantryError;

/// Lifecycle status of a draft row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    CreateDraft,
    UpdateDraft,
    DeleteDraft,
    Success,
    Deleted,
}

impl ResourceStatus {
    pub const ALL: [ResourceStatus; 5] = [
        ResourceStatus::CreateDraft,
        ResourceStatus::UpdateDraft,
        ResourceStatus::DeleteDraft,
        ResourceStatus::Success,
        ResourceStatus::Deleted,
    ];

    /// Statuses holding an unpublished change.
    pub const DRAFTS: [ResourceStatus; 3] = [
        ResourceStatus::CreateDraft,
        ResourceStatus::UpdateDraft,
        ResourceStatus::DeleteDraft,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::CreateDraft => "create_draft",
            ResourceStatus::UpdateDraft => "update_draft",
            ResourceStatus::DeleteDraft => "delete_draft",
            ResourceStatus::Success => "success",
            ResourceStatus::Deleted => "deleted",
        }
    }

    pub fn is_draft(self) -> bool {
        ResourceStatus::DRAFTS.contains(&self)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GantryError::Validation(format!("unknown resource status '{}'", s)))
    }
}

/// Operation applied to a resource; also the audit-log annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Publish,
    Revert,
    OneClickManaged,
}

impl OperationType {
    pub const ALL: [OperationType; 6] = [
        OperationType::Create,
        OperationType::Update,
        OperationType::Delete,
        OperationType::Publish,
        OperationType::Revert,
        OperationType::OneClickManaged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Publish => "publish",
            OperationType::Revert => "revert",
            OperationType::OneClickManaged => "one_click_managed",
        }
    }

    /// Draft operation that left a row in `status`.
    pub fn pending_from(status: ResourceStatus) -> Option<OperationType> {
        match status {
            ResourceStatus::CreateDraft => Some(OperationType::Create),
            ResourceStatus::UpdateDraft => Some(OperationType::Update),
            ResourceStatus::DeleteDraft => Some(OperationType::Delete),
            ResourceStatus::Success | ResourceStatus::Deleted => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| GantryError::Validation(format!("unknown operation type '{}'", s)))
    }
}
