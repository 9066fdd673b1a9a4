//! Tenant snapshot export.

use std::collections::BTreeMap;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, SqliteConnection, SqlitePool, TypeInfo, ValueRef};
use tracing::info;
use ts_rs::TS;

use crate::db::quote_ident;
use crate::relations::insert_order;
use crate::schema::{
    load_live_schema, LiveSchema, SkippedTable, TableSchema, ID_COLUMN, META_KEY, TENANT_COLUMN,
};
use crate::{AppError, AppResult};

/// Tag marking a JSON object as an encoded binary value.
pub const BLOB_KIND: &str = "blob/base64";

/// One exported row, keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ExportMeta {
    pub exported_at: String,
    pub source: String,
    pub tenant_id: String,
    pub tenant_filter: String,
    pub tables: Vec<String>,
    pub skipped: Vec<SkippedTable>,
}

/// A full tenant snapshot: one row array per table plus the `meta` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub meta: ExportMeta,
    #[serde(flatten)]
    pub tables: BTreeMap<String, Vec<Row>>,
}

impl ExportPayload {
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn to_value(&self) -> AppResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Encode binary data in the tagged JSON form.
pub fn encode_blob(bytes: &[u8]) -> Value {
    json!({ "kind": BLOB_KIND, "data": BASE64.encode(bytes) })
}

fn source_label() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn tenant_filter(tenant_id: &str) -> String {
    format!("{TENANT_COLUMN} = '{}'", tenant_id.replace('\'', "''"))
}

/// Convert one result row to JSON, keeping SQLite's dynamic value types.
pub fn row_to_json(row: &SqliteRow) -> Row {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let val = match row.try_get_raw(idx) {
            Ok(raw) if !raw.is_null() => match raw.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "REAL" => row
                    .try_get::<f64, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "BLOB" => row
                    .try_get::<Vec<u8>, _>(idx)
                    .map(|bytes| encode_blob(&bytes))
                    .unwrap_or(Value::Null),
                _ => match row.try_get::<String, _>(idx) {
                    Ok(text) => Value::from(text),
                    Err(_) => row
                        .try_get::<Vec<u8>, _>(idx)
                        .map(|bytes| encode_blob(&bytes))
                        .unwrap_or(Value::Null),
                },
            },
            _ => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    map
}

fn select_sql(table: &TableSchema) -> String {
    let order = if !table.without_rowid {
        " ORDER BY rowid".to_string()
    } else if table.has_id_column() {
        format!(" ORDER BY {}", quote_ident(ID_COLUMN))
    } else {
        String::new()
    };
    format!(
        "SELECT * FROM {} WHERE {} = ?1{}",
        quote_ident(&table.name),
        quote_ident(TENANT_COLUMN),
        order
    )
}

async fn export_table(
    conn: &mut SqliteConnection,
    table: &TableSchema,
    tenant_id: &str,
) -> AppResult<Vec<Row>> {
    let start = Instant::now();
    let sql = select_sql(table);
    let mut stream = sqlx::query(&sql).bind(tenant_id).fetch(&mut *conn);

    let mut rows = Vec::new();
    while let Some(row) = stream
        .try_next()
        .await
        .map_err(|err| AppError::from(err).with_context("table", table.name.clone()))?
    {
        rows.push(row_to_json(&row));
    }

    info!(
        target: "recordkeep",
        event = "export_table",
        table = %table.name,
        rows = rows.len(),
        ms = start.elapsed().as_millis() as u64
    );
    Ok(rows)
}

/// Tenant rows of every scoped table, read through one connection.
async fn read_tables(
    conn: &mut SqliteConnection,
    schema: &LiveSchema,
    tenant_id: &str,
) -> AppResult<BTreeMap<String, Vec<Row>>> {
    let mut tables = BTreeMap::new();
    for name in insert_order(schema.tenant_tables().map(|t| t.name.as_str())) {
        if name == META_KEY {
            continue;
        }
        let Some(table) = schema.table(name) else {
            continue;
        };
        let rows = export_table(conn, table, tenant_id).await?;
        tables.insert(name.to_string(), rows);
    }
    Ok(tables)
}

/// Read every row owned by `tenant_id` from every tenant-scoped table.
///
/// All tables are read inside one transaction so the snapshot is consistent
/// even while commits land.
pub async fn export_tenant(pool: &SqlitePool, tenant_id: &str) -> AppResult<ExportPayload> {
    if tenant_id.trim().is_empty() {
        return Err(AppError::validation(
            "TENANT_REQUIRED",
            "ownerId is required to export",
        ));
    }

    let start = Instant::now();
    let schema = load_live_schema(pool).await?;

    let mut tx = pool.begin().await?;
    let tables = read_tables(&mut tx, &schema, tenant_id).await?;
    tx.commit().await?;
    let exported: Vec<String> = insert_order(tables.keys().map(String::as_str))
        .into_iter()
        .map(str::to_string)
        .collect();

    let meta = ExportMeta {
        exported_at: crate::time::now_rfc3339(),
        source: source_label(),
        tenant_id: tenant_id.to_string(),
        tenant_filter: tenant_filter(tenant_id),
        tables: exported,
        skipped: schema.skipped(),
    };

    info!(
        target: "recordkeep",
        event = "export_complete",
        tenant_id = %tenant_id,
        tables = meta.tables.len(),
        skipped = meta.skipped.len(),
        rows = tables.values().map(Vec::len).sum::<usize>(),
        ms = start.elapsed().as_millis() as u64
    );

    Ok(ExportPayload { meta, tables })
}
