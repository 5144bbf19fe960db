//! Operation audit log entity
//!
//! Append-only before/after snapshots of every batch operation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "operation_audit_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub gateway_id: i64,
    /// create, update, delete, publish, revert
    pub operation_type: String,
    pub operator: String,
    /// Comma-joined resource IDs
    #[sea_orm(column_type = "Text")]
    pub resource_ids: String,
    pub resource_type: String,
    /// JSON array of {id, status, config}
    #[sea_orm(column_type = "Text")]
    pub data_before: String,
    #[sea_orm(column_type = "Text")]
    pub data_after: String,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
