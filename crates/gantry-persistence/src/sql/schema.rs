//! Table bootstrap for a fresh database.

use gantry_common::ResourceKind;
use sea_orm::sea_query::{ColumnDef, Index, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseConnection, Schema};
use tracing::info;

use super::draft::col;
use crate::entity::{gateway, gateway_sync_data, operation_audit_log};

fn draft_table(kind: ResourceKind) -> TableCreateStatement {
    let table = kind.table_name();
    let mut stmt = Table::create();
    stmt.table(col(table))
        .if_not_exists()
        .col(
            ColumnDef::new(col("auto_id"))
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(col("id")).string_len(255).not_null())
        .col(ColumnDef::new(col("gateway_id")).big_integer().not_null())
        .col(ColumnDef::new(col("name")).string_len(255).not_null().default(""))
        .col(ColumnDef::new(col("config")).text().not_null())
        .col(ColumnDef::new(col("status")).string_len(32).not_null())
        .col(ColumnDef::new(col("service_id")).string_len(255).null())
        .col(ColumnDef::new(col("upstream_id")).string_len(255).null())
        .col(ColumnDef::new(col("plugin_config_id")).string_len(255).null())
        .col(ColumnDef::new(col("group_id")).string_len(255).null())
        .col(ColumnDef::new(col("ssl_id")).string_len(255).null())
        .col(ColumnDef::new(col("operation_type")).string_len(32).null())
        .col(ColumnDef::new(col("creator")).string_len(64).not_null())
        .col(ColumnDef::new(col("updater")).string_len(64).not_null())
        .col(ColumnDef::new(col("created_at")).date_time().not_null())
        .col(ColumnDef::new(col("updated_at")).date_time().not_null())
        .index(
            Index::create()
                .unique()
                .name(format!("uk_{}_gateway_id_id", table))
                .col(col("gateway_id"))
                .col(col("id")),
        );
    stmt
}

/// The snapshot table with its unique key declared inline; MySQL has no
/// `CREATE INDEX IF NOT EXISTS`.
fn sync_data_table(schema: &Schema) -> TableCreateStatement {
    let mut stmt = schema.create_table_from_entity(gateway_sync_data::Entity);
    stmt.if_not_exists().index(
        Index::create()
            .unique()
            .name("uk_gateway_sync_data_gateway_type_id")
            .col(gateway_sync_data::Column::GatewayId)
            .col(gateway_sync_data::Column::ResourceType)
            .col(gateway_sync_data::Column::Id),
    );
    stmt
}

/// Create every table the control plane uses if it does not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> anyhow::Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut fixed = vec![
        schema.create_table_from_entity(gateway::Entity),
        sync_data_table(&schema),
        schema.create_table_from_entity(operation_audit_log::Entity),
    ];
    for stmt in fixed.iter_mut() {
        db.execute(backend.build(stmt.if_not_exists())).await?;
    }

    for kind in ResourceKind::ALL {
        db.execute(backend.build(&draft_table(kind))).await?;
    }

    info!("Database tables are ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DbBackend;

    #[test]
    fn test_ddl_has_no_standalone_index() {
        for backend in [DbBackend::MySql, DbBackend::Postgres] {
            let schema = Schema::new(backend);
            let statements = [
                backend.build(&sync_data_table(&schema)).sql,
                backend.build(&draft_table(ResourceKind::Route)).sql,
            ];
            for sql in statements {
                assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS"), "{sql}");
                assert!(!sql.contains("CREATE INDEX"), "{sql}");
            }
            let sync = backend.build(&sync_data_table(&schema)).sql;
            assert!(sync.contains("uk_gateway_sync_data_gateway_type_id"), "{sync}");
        }
    }
}
