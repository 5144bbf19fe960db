use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "gateway")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub apisix_type: String,
    pub apisix_version: String,
    /// Endpoints, prefix and credentials as JSON
    #[sea_orm(column_type = "Text")]
    pub etcd_config: String,
    pub read_only: bool,
    pub last_synced_at: Option<DateTime>,
    pub creator: String,
    pub updater: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
