//! Synced snapshot entity
//!
//! Last observed etcd content per (gateway_id, type, id).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "gateway_sync_data")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub auto_id: i64,
    pub id: String,
    pub gateway_id: i64,
    #[sea_orm(column_name = "type")]
    pub resource_type: String,
    #[sea_orm(column_type = "Text")]
    pub config: String,
    pub mod_revision: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
