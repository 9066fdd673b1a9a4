#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use recordkeep_lib::db::open_sqlite_pool;
use recordkeep_lib::migrate::apply_migrations;

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

/// In-memory database with the baseline business schema.
pub async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    apply_migrations(&pool).await.expect("apply baseline");
    pool
}

/// File-backed WAL database with the baseline schema, for tests that need
/// several connections at once.
pub async fn migrated_file_pool(dir: &std::path::Path) -> SqlitePool {
    let pool = open_sqlite_pool(&dir.join("records.sqlite3"))
        .await
        .expect("open file pool");
    apply_migrations(&pool).await.expect("apply baseline");
    pool
}

pub async fn exec(pool: &SqlitePool, sql: &str) {
    sqlx::query(sql).execute(pool).await.unwrap();
}

pub async fn count(pool: &SqlitePool, table: &str, owner: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE owner_id = ?1"))
        .bind(owner)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn count_all(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// One supplier with one transaction and one payment for `owner`, plus payroll.
pub async fn seed_tenant(pool: &SqlitePool, owner: &str) {
    sqlx::query("INSERT INTO suppliers (id, owner_id, name, balance) VALUES ('s1', ?1, 'Acme', 100)")
        .bind(owner)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO supplier_transactions (id, owner_id, supplier_id, amount) VALUES ('t1', ?1, 's1', 100)",
    )
    .bind(owner)
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO supplier_payments (id, owner_id, transaction_id, supplier_id, amount) \
         VALUES ('p1', ?1, 't1', 's1', 40)",
    )
    .bind(owner)
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO employees (id, owner_id, name, daily_rate) VALUES ('e1', ?1, 'Dana', 80.5)")
        .bind(owner)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO payroll (owner_id, employee_id, period, amount) VALUES (?1, 'e1', '2024-05', 1610)",
    )
    .bind(owner)
    .execute(pool)
    .await
    .unwrap();
}

/// Export payload as a bare JSON value with `meta` removed, for content comparisons.
pub fn tables_only(mut value: Value) -> Value {
    if let Some(map) = value.as_object_mut() {
        map.remove("meta");
    }
    value
}

pub fn supplier_payload(owner: &str, ids: &[&str]) -> Value {
    let rows: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "owner_id": owner, "name": format!("Supplier {id}"), "balance": 0}))
        .collect();
    json!({ "meta": {"tenantId": owner}, "suppliers": rows })
}
