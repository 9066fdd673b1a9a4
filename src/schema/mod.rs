//! Live schema discovery.
//!
//! Columns come from the stored `CREATE TABLE` text in `sqlite_master`. The
//! catalog (`pragma_table_info`) is only consulted when the text yields no
//! columns at all. Nothing here is cached; every request loads a fresh view.

pub mod definition;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use ts_rs::TS;

use crate::error::AppResult;

pub use definition::{columns_of, definition_body};

/// Column that scopes a row to its tenant.
pub const TENANT_COLUMN: &str = "owner_id";
/// Identifier column of every remappable table.
pub const ID_COLUMN: &str = "id";
/// Payload key holding export metadata rather than rows.
pub const META_KEY: &str = "meta";

const RESERVED_TABLES: &[&str] = &[
    "users",
    "sessions",
    "auth_tokens",
    "password_resets",
    "schema_migrations",
    META_KEY,
];

static RESERVED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(sqlite_|_cf_|d1_)").expect("valid reserved prefix regex"));

/// True for system, authentication and bookkeeping tables that never travel in a backup.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_PREFIX.is_match(name) || RESERVED_TABLES.contains(&name)
}

fn is_virtual_definition(create_sql: &str) -> bool {
    let mut words = create_sql.split_whitespace();
    matches!(
        (words.next(), words.next()),
        (Some(create), Some(kind))
            if create.eq_ignore_ascii_case("CREATE") && kind.eq_ignore_ascii_case("VIRTUAL")
    )
}

/// Why a live table is left out of an export or import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SkipReason {
    NoTenantColumn,
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SkippedTable {
    pub table: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub without_rowid: bool,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            without_rowid: false,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn has_tenant_column(&self) -> bool {
        self.has_column(TENANT_COLUMN)
    }

    pub fn has_id_column(&self) -> bool {
        self.has_column(ID_COLUMN)
    }
}

/// Every user table of the destination database at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSchema {
    tables: BTreeMap<String, TableSchema>,
    reserved: BTreeSet<String>,
}

impl LiveSchema {
    pub fn from_tables(tables: impl IntoIterator<Item = TableSchema>) -> Self {
        let mut schema = LiveSchema::default();
        for table in tables {
            schema.insert(table);
        }
        schema
    }

    fn insert(&mut self, table: TableSchema) {
        if is_reserved_name(&table.name) {
            self.reserved.insert(table.name);
        } else {
            self.tables.insert(table.name.clone(), table);
        }
    }

    pub fn mark_reserved(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.tables.remove(&name);
        self.reserved.insert(name);
    }

    /// Non-reserved table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name) || is_reserved_name(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Tables that carry the tenant column, in name order.
    pub fn tenant_tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values().filter(|t| t.has_tenant_column())
    }

    /// Live tables left out of a tenant snapshot, with the reason.
    pub fn skipped(&self) -> Vec<SkippedTable> {
        let mut skipped: Vec<SkippedTable> = self
            .reserved
            .iter()
            .map(|name| SkippedTable {
                table: name.clone(),
                reason: SkipReason::Reserved,
            })
            .chain(
                self.tables
                    .values()
                    .filter(|t| !t.has_tenant_column())
                    .map(|t| SkippedTable {
                        table: t.name.clone(),
                        reason: SkipReason::NoTenantColumn,
                    }),
            )
            .collect();
        skipped.sort_by(|a, b| a.table.cmp(&b.table));
        skipped
    }
}

/// Load the current schema from `sqlite_master`.
pub async fn load_live_schema(pool: &SqlitePool) -> AppResult<LiveSchema> {
    let start = Instant::now();
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut schema = LiveSchema::default();
    for (name, sql) in rows {
        let sql = sql.unwrap_or_default();
        if is_reserved_name(&name) || is_virtual_definition(&sql) {
            schema.mark_reserved(name);
            continue;
        }

        let mut columns = definition_body(&sql).map(columns_of).unwrap_or_default();
        if columns.is_empty() {
            columns = catalog_columns(pool, &name).await?;
            tracing::warn!(
                target: "recordkeep",
                event = "schema_catalog_fallback",
                table = %name,
                columns = columns.len()
            );
        }

        schema.insert(TableSchema {
            without_rowid: definition::is_without_rowid(&sql),
            name,
            columns,
        });
    }

    tracing::debug!(
        target: "recordkeep",
        event = "schema_loaded",
        tables = schema.tables.len(),
        reserved = schema.reserved.len(),
        ms = start.elapsed().as_millis() as u64
    );
    Ok(schema)
}

async fn catalog_columns(pool: &SqlitePool, table: &str) -> AppResult<Vec<String>> {
    let names: Vec<String> =
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table)
            .fetch_all(pool)
            .await?;
    Ok(names)
}
