//! Dynamic queries over the per-kind draft tables.

use chrono::NaiveDateTime;
use gantry_common::ResourceKind;
use sea_orm::FromQueryResult;
use sea_orm::sea_query::{
    Alias, Condition, ConditionalStatement, DeleteStatement, Expr, Func, InsertStatement,
    IntoColumnRef, LikeExpr, Order, Query, SelectStatement, SimpleExpr, UpdateStatement,
};

use crate::model::{DraftFilter, DraftRow, StatusUpdate};

pub(crate) const DRAFT_COLUMNS: [&str; 15] = [
    "id",
    "gateway_id",
    "name",
    "config",
    "status",
    "service_id",
    "upstream_id",
    "plugin_config_id",
    "group_id",
    "ssl_id",
    "operation_type",
    "creator",
    "updater",
    "created_at",
    "updated_at",
];

pub(crate) fn col(name: &str) -> Alias {
    Alias::new(name)
}

#[derive(Debug, FromQueryResult)]
pub(crate) struct DraftRecord {
    id: String,
    gateway_id: i64,
    name: String,
    config: String,
    status: String,
    service_id: Option<String>,
    upstream_id: Option<String>,
    plugin_config_id: Option<String>,
    group_id: Option<String>,
    ssl_id: Option<String>,
    operation_type: Option<String>,
    creator: String,
    updater: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl DraftRecord {
    pub(crate) fn into_row(self, kind: ResourceKind) -> anyhow::Result<DraftRow> {
        Ok(DraftRow {
            status: self.status.parse()?,
            operation_type: self
                .operation_type
                .filter(|op| !op.is_empty())
                .map(|op| op.parse())
                .transpose()?,
            id: self.id,
            gateway_id: self.gateway_id,
            kind,
            name: self.name,
            config: self.config,
            service_id: self.service_id,
            upstream_id: self.upstream_id,
            plugin_config_id: self.plugin_config_id,
            group_id: self.group_id,
            ssl_id: self.ssl_id,
            creator: self.creator,
            updater: self.updater,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn filter_condition(gateway_id: i64, filter: &DraftFilter) -> Condition {
    let mut cond = Condition::all().add(Expr::col(col("gateway_id")).eq(gateway_id));
    if let Some(ids) = &filter.ids {
        cond = cond.add(Expr::col(col("id")).is_in(ids.iter().cloned()));
    }
    if let Some(names) = &filter.names {
        cond = cond.add(Expr::col(col("name")).is_in(names.iter().cloned()));
    }
    if let Some(statuses) = &filter.statuses {
        cond = cond.add(Expr::col(col("status")).is_in(statuses.iter().map(|s| s.as_str())));
    }
    if let Some(needle) = &filter.name_contains {
        let pattern = format!("%{}%", escape_like(needle));
        cond = cond.add(Expr::col(col("name")).like(like_pattern(pattern)));
    }
    cond
}

/// Escapes LIKE wildcards so `input` matches literally under [`like_pattern`].
pub(crate) fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub(crate) fn like_pattern(pattern: String) -> LikeExpr {
    LikeExpr::new(pattern).escape('\\')
}

/// LIKE patterns matching `id` as an inner, leading or trailing element of a
/// comma-joined list. The whole-value case is an equality check.
pub(crate) fn id_list_patterns(id: &str) -> [String; 3] {
    let id = escape_like(id);
    [
        format!("%,{},%", id),
        format!("{},%", id),
        format!("%,{}", id),
    ]
}

/// `column` holds a comma-joined id list containing `id`.
pub(crate) fn id_list_contains<C>(column: C, id: &str) -> Condition
where
    C: IntoColumnRef + Copy,
{
    id_list_patterns(id).into_iter().fold(
        Condition::any().add(Expr::col(column).eq(id)),
        |cond, pattern| cond.add(Expr::col(column).like(like_pattern(pattern))),
    )
}

pub(crate) fn select(kind: ResourceKind, cond: Condition) -> SelectStatement {
    let mut select = Query::select();
    select
        .columns(DRAFT_COLUMNS.iter().map(|c| col(c)))
        .from(col(kind.table_name()))
        .cond_where(cond)
        .order_by(col("auto_id"), Order::Asc);
    select
}

pub(crate) fn select_page(
    kind: ResourceKind,
    cond: Condition,
    page_no: u64,
    page_size: u64,
) -> SelectStatement {
    let mut select = Query::select();
    select
        .columns(DRAFT_COLUMNS.iter().map(|c| col(c)))
        .from(col(kind.table_name()))
        .cond_where(cond)
        .order_by(col("updated_at"), Order::Desc)
        .order_by(col("auto_id"), Order::Desc)
        .limit(page_size)
        .offset(page_no.saturating_sub(1) * page_size);
    select
}

pub(crate) fn count(kind: ResourceKind, cond: Condition) -> SelectStatement {
    let mut select = Query::select();
    select
        .expr_as(Func::count(Expr::col(col("auto_id"))), col("total"))
        .from(col(kind.table_name()))
        .cond_where(cond);
    select
}

fn row_values(row: &DraftRow) -> Vec<SimpleExpr> {
    vec![
        row.id.clone().into(),
        row.gateway_id.into(),
        row.name.clone().into(),
        row.config.clone().into(),
        row.status.as_str().into(),
        row.service_id.clone().into(),
        row.upstream_id.clone().into(),
        row.plugin_config_id.clone().into(),
        row.group_id.clone().into(),
        row.ssl_id.clone().into(),
        row.operation_type.map(|op| op.as_str().to_string()).into(),
        row.creator.clone().into(),
        row.updater.clone().into(),
        row.created_at.into(),
        row.updated_at.into(),
    ]
}

pub(crate) fn insert(kind: ResourceKind, rows: &[DraftRow]) -> anyhow::Result<InsertStatement> {
    let mut insert = Query::insert();
    insert
        .into_table(col(kind.table_name()))
        .columns(DRAFT_COLUMNS.iter().map(|c| col(c)));
    for row in rows {
        insert.values(row_values(row))?;
    }
    Ok(insert)
}

/// Overwrites every mutable column of one row.
pub(crate) fn update_row(kind: ResourceKind, row: &DraftRow) -> UpdateStatement {
    let mut update = Query::update();
    update
        .table(col(kind.table_name()))
        .values([
            (col("name"), row.name.clone().into()),
            (col("config"), row.config.clone().into()),
            (col("status"), row.status.as_str().into()),
            (col("service_id"), row.service_id.clone().into()),
            (col("upstream_id"), row.upstream_id.clone().into()),
            (col("plugin_config_id"), row.plugin_config_id.clone().into()),
            (col("group_id"), row.group_id.clone().into()),
            (col("ssl_id"), row.ssl_id.clone().into()),
            (
                col("operation_type"),
                row.operation_type.map(|op| op.as_str().to_string()).into(),
            ),
            (col("updater"), row.updater.clone().into()),
            (col("updated_at"), row.updated_at.into()),
        ])
        .and_where(Expr::col(col("gateway_id")).eq(row.gateway_id))
        .and_where(Expr::col(col("id")).eq(row.id.clone()));
    update
}

pub(crate) fn update_status(
    kind: ResourceKind,
    gateway_id: i64,
    change: &StatusUpdate,
    ids: &[String],
    now: NaiveDateTime,
) -> UpdateStatement {
    let mut update = Query::update();
    update
        .table(col(kind.table_name()))
        .values([
            (col("status"), change.status.as_str().into()),
            (
                col("operation_type"),
                change.operation_type.map(|op| op.as_str().to_string()).into(),
            ),
            (col("updater"), change.updater.clone().into()),
            (col("updated_at"), now.into()),
        ])
        .and_where(Expr::col(col("gateway_id")).eq(gateway_id))
        .and_where(Expr::col(col("id")).is_in(ids.iter().cloned()));
    update
}

pub(crate) fn delete(kind: ResourceKind, gateway_id: i64, ids: &[String]) -> DeleteStatement {
    let mut delete = Query::delete();
    delete
        .from_table(col(kind.table_name()))
        .and_where(Expr::col(col("gateway_id")).eq(gateway_id))
        .and_where(Expr::col(col("id")).is_in(ids.iter().cloned()));
    delete
}
