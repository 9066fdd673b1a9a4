#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use serde_json::{json, Value};

use recordkeep_lib::export::export_tenant;
use recordkeep_lib::import::{commit, dry_run, ImportMode, ImportOptions, ImportPayload};
use recordkeep_lib::schema::SkipReason;
use util::{
    count, count_all, exec, migrated_file_pool, migrated_pool, seed_tenant, supplier_payload,
    tables_only,
};

fn replace() -> ImportOptions {
    ImportOptions {
        mode: ImportMode::Replace,
        strict: false,
    }
}

fn merge() -> ImportOptions {
    ImportOptions::default()
}

async fn exported_value(pool: &sqlx::SqlitePool, owner: &str) -> Value {
    export_tenant(pool, owner).await.unwrap().to_value().unwrap()
}

#[tokio::test]
async fn export_contains_only_the_tenants_rows() {
    let pool = migrated_pool().await;
    seed_tenant(&pool, "o1").await;
    exec(&pool, "INSERT INTO customers (id, owner_id, name) VALUES ('c9', 'o2', 'Other')").await;
    exec(&pool, "INSERT INTO suppliers (id, owner_id, name) VALUES ('s9', 'o2', 'Other')").await;

    let payload = export_tenant(&pool, "o1").await.unwrap();
    for (table, rows) in &payload.tables {
        for row in rows {
            assert_eq!(row["owner_id"], json!("o1"), "foreign row leaked from {table}");
        }
    }
    assert_eq!(payload.rows("suppliers").len(), 1);
    assert!(payload.rows("customers").is_empty());
    assert_eq!(payload.meta.tenant_id, "o1");
    assert_eq!(payload.meta.tenant_filter, "owner_id = 'o1'");

    assert!(payload.meta.tables.iter().any(|t| t == "supplier_payments"));
    let position = |name: &str| payload.meta.tables.iter().position(|t| t == name).unwrap();
    assert!(position("suppliers") < position("supplier_transactions"));
    assert!(position("supplier_transactions") < position("supplier_payments"));

    for reserved in ["users", "sessions", "schema_migrations", "sqlite_sequence"] {
        assert!(
            payload
                .meta
                .skipped
                .iter()
                .any(|s| s.table == reserved && s.reason == SkipReason::Reserved),
            "{reserved} should be skipped as reserved"
        );
        assert!(!payload.tables.contains_key(reserved));
    }
}

#[tokio::test]
async fn export_skips_tables_without_tenant_column() {
    let pool = migrated_pool().await;
    exec(&pool, "CREATE TABLE currencies (code TEXT PRIMARY KEY, label TEXT)").await;
    let payload = export_tenant(&pool, "o1").await.unwrap();
    assert!(payload
        .meta
        .skipped
        .iter()
        .any(|s| s.table == "currencies" && s.reason == SkipReason::NoTenantColumn));
    assert!(!payload.tables.contains_key("currencies"));
}

#[tokio::test]
async fn export_requires_tenant() {
    let pool = migrated_pool().await;
    let err = export_tenant(&pool, "  ").await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION/TENANT_REQUIRED");
}

#[tokio::test]
async fn colliding_supplier_gets_new_id_and_children_follow() {
    let source = migrated_pool().await;
    seed_tenant(&source, "o1").await;
    let snapshot = exported_value(&source, "o1").await;

    let dest = migrated_pool().await;
    exec(&dest, "INSERT INTO suppliers (id, owner_id, name) VALUES ('s1', 'o2', 'Taken')").await;

    let payload = ImportPayload::from_value(snapshot).unwrap();
    let report = commit(&dest, &payload, "o1", &replace()).await.unwrap();
    assert!(report.ok, "warnings: {:?}", report.warnings);
    assert!(!report.dry_run);

    let (new_id,): (String,) = sqlx::query_as("SELECT id FROM suppliers WHERE owner_id = 'o1'")
        .fetch_one(&dest)
        .await
        .unwrap();
    assert_ne!(new_id, "s1");

    let (tx_supplier,): (String,) =
        sqlx::query_as("SELECT supplier_id FROM supplier_transactions WHERE owner_id = 'o1'")
            .fetch_one(&dest)
            .await
            .unwrap();
    assert_eq!(tx_supplier, new_id);

    let (payment_tx, payment_supplier): (String, String) = sqlx::query_as(
        "SELECT transaction_id, supplier_id FROM supplier_payments WHERE owner_id = 'o1'",
    )
    .fetch_one(&dest)
    .await
    .unwrap();
    assert_eq!(payment_tx, "t1");
    assert_eq!(payment_supplier, new_id);

    let (other,): (String,) = sqlx::query_as("SELECT name FROM suppliers WHERE id = 's1'")
        .fetch_one(&dest)
        .await
        .unwrap();
    assert_eq!(other, "Taken");

    let suppliers = report.table("suppliers").unwrap();
    assert_eq!(suppliers.inserted, Some(1));
    assert_eq!(suppliers.remapped, Some(1));
    assert_eq!(report.table("supplier_transactions").unwrap().remapped, Some(0));
    for table in &report.tables {
        assert_eq!(table.inserted, Some(table.rows_in_file), "{}", table.table);
    }
}

#[tokio::test]
async fn colliding_integer_id_takes_next_free_integer() {
    let source = migrated_pool().await;
    seed_tenant(&source, "o1").await;
    let snapshot = exported_value(&source, "o1").await;
    assert_eq!(snapshot["payroll"][0]["id"], json!(1));

    let dest = migrated_pool().await;
    exec(&dest, "INSERT INTO employees (id, owner_id, name) VALUES ('e7', 'o2', 'Kim')").await;
    exec(
        &dest,
        "INSERT INTO payroll (id, owner_id, employee_id, period, amount) VALUES (1, 'o2', 'e7', '2024-05', 10)",
    )
    .await;

    let payload = ImportPayload::from_value(snapshot).unwrap();
    let report = commit(&dest, &payload, "o1", &merge()).await.unwrap();
    assert!(report.ok, "warnings: {:?}", report.warnings);

    let (id, employee): (i64, String) =
        sqlx::query_as("SELECT id, employee_id FROM payroll WHERE owner_id = 'o1'")
            .fetch_one(&dest)
            .await
            .unwrap();
    assert_eq!(id, 2);
    assert_eq!(employee, "e1");
    assert_eq!(report.table("payroll").unwrap().remapped, Some(1));
}

#[tokio::test]
async fn merge_adds_rows_and_replace_swaps_them() {
    let pool = migrated_pool().await;
    let existing = supplier_payload("o1", &["a1", "a2"]);
    let report = commit(&pool, &ImportPayload::from_value(existing).unwrap(), "o1", &merge())
        .await
        .unwrap();
    assert!(report.ok);
    assert_eq!(count(&pool, "suppliers", "o1").await, 2);

    let incoming = ImportPayload::from_value(supplier_payload("o1", &["b1", "b2", "b3"])).unwrap();
    let report = commit(&pool, &incoming, "o1", &merge()).await.unwrap();
    assert!(report.ok);
    assert_eq!(count(&pool, "suppliers", "o1").await, 5);

    let report = commit(&pool, &incoming, "o1", &replace()).await.unwrap();
    assert!(report.ok);
    assert_eq!(count(&pool, "suppliers", "o1").await, 3);
    assert_eq!(report.table("suppliers").unwrap().remapped, Some(0));
}

#[tokio::test]
async fn replace_round_trip_into_same_database_keeps_contents() {
    let pool = migrated_pool().await;
    seed_tenant(&pool, "o1").await;
    exec(&pool, "INSERT INTO customers (id, owner_id, name) VALUES ('c1', 'o2', 'Other')").await;
    let before = exported_value(&pool, "o1").await;

    let payload = ImportPayload::from_value(before.clone()).unwrap();
    let report = commit(&pool, &payload, "o1", &replace()).await.unwrap();
    assert!(report.ok, "warnings: {:?}", report.warnings);

    let after = exported_value(&pool, "o1").await;
    assert_eq!(tables_only(after), tables_only(before));
    assert_eq!(count(&pool, "customers", "o2").await, 1);
}

#[tokio::test]
async fn merge_into_same_database_duplicates_with_consistent_references() {
    let pool = migrated_pool().await;
    seed_tenant(&pool, "o1").await;
    let payload = ImportPayload::from_value(exported_value(&pool, "o1").await).unwrap();

    let report = commit(&pool, &payload, "o1", &merge()).await.unwrap();
    assert!(report.ok, "warnings: {:?}", report.warnings);
    assert_eq!(count(&pool, "suppliers", "o1").await, 2);
    assert_eq!(count(&pool, "supplier_payments", "o1").await, 2);

    let dangling: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM supplier_payments p \
         LEFT JOIN supplier_transactions t ON t.id = p.transaction_id \
         WHERE t.supplier_id IS NOT p.supplier_id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(dangling, 0);

    let violations: Vec<(String,)> = sqlx::query_as("SELECT \"table\" FROM pragma_foreign_key_check")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(violations.is_empty(), "{violations:?}");
}

#[tokio::test]
async fn dry_run_is_repeatable_and_writes_nothing() {
    let pool = migrated_pool().await;
    seed_tenant(&pool, "o1").await;
    let mut snapshot = exported_value(&pool, "o1").await;
    snapshot["suppliers"][0]["fax"] = json!("555");
    snapshot["legacy_notes"] = json!([{"id": "n1"}]);
    let payload = ImportPayload::from_value(snapshot).unwrap();

    let before = exported_value(&pool, "o1").await;
    let first = dry_run(&pool, &payload, Some("o1"), &replace()).await.unwrap();
    let second = dry_run(&pool, &payload, Some("o1"), &replace()).await.unwrap();
    assert_eq!(first, second);
    assert!(first.dry_run);
    assert!(first.ok);
    assert_eq!(first.tables_missing_in_db, vec!["legacy_notes"]);
    assert_eq!(
        first.table("suppliers").unwrap().missing_columns,
        vec!["fax".to_string()]
    );
    assert!(first.tables.iter().all(|t| t.inserted.is_none()));

    let after = exported_value(&pool, "o1").await;
    assert_eq!(tables_only(after), tables_only(before));
}

#[tokio::test]
async fn failed_commit_rolls_back_and_reports_not_ok() {
    let pool = migrated_pool().await;
    seed_tenant(&pool, "o1").await;

    // The second supplier violates NOT NULL on name.
    let payload = ImportPayload::from_value(json!({
        "suppliers": [
            {"id": "n1", "owner_id": "o1", "name": "Fine"},
            {"id": "n2", "owner_id": "o1", "name": null}
        ]
    }))
    .unwrap();
    let report = commit(&pool, &payload, "o1", &replace()).await.unwrap();
    assert!(!report.ok);
    assert!(!report.dry_run);
    assert!(report.tables.iter().all(|t| t.inserted.is_none()));
    assert!(report.warnings.iter().any(|w| w.starts_with("commit failed")));

    // The replace deletes were rolled back with the inserts.
    assert_eq!(count(&pool, "suppliers", "o1").await, 1);
    assert_eq!(count(&pool, "payroll", "o1").await, 1);
}

#[tokio::test]
async fn undecodable_blob_fails_the_commit() {
    let pool = migrated_pool().await;
    let payload = ImportPayload::from_value(json!({
        "employees": [{"id": "e1", "name": "Dana", "photo": {"kind": "blob/base64", "data": "%%%"}}]
    }))
    .unwrap();
    let report = commit(&pool, &payload, "o1", &merge()).await.unwrap();
    assert!(!report.ok);
    assert!(report.warnings.iter().any(|w| w.contains("employees.photo")));
    assert_eq!(count_all(&pool, "employees").await, 0);
}

#[tokio::test]
async fn binary_columns_round_trip() {
    let source = migrated_pool().await;
    let photo: Vec<u8> = vec![0, 1, 2, 254, 255];
    sqlx::query("INSERT INTO employees (id, owner_id, name, photo) VALUES ('e1', 'o1', 'Dana', ?1)")
        .bind(&photo)
        .execute(&source)
        .await
        .unwrap();
    let snapshot = exported_value(&source, "o1").await;
    assert_eq!(snapshot["employees"][0]["photo"]["kind"], json!("blob/base64"));

    let dest = migrated_pool().await;
    let report = commit(&dest, &ImportPayload::from_value(snapshot).unwrap(), "o1", &merge())
        .await
        .unwrap();
    assert!(report.ok);
    let (stored,): (Vec<u8>,) = sqlx::query_as("SELECT photo FROM employees WHERE id = 'e1'")
        .fetch_one(&dest)
        .await
        .unwrap();
    assert_eq!(stored, photo);
}

#[tokio::test]
async fn strict_mode_refuses_drifting_payload() {
    let pool = migrated_pool().await;
    let mut snapshot = supplier_payload("o1", &["a1"]);
    snapshot["suppliers"][0]["fax"] = json!("555");
    let payload = ImportPayload::from_value(snapshot).unwrap();
    let options = ImportOptions {
        mode: ImportMode::Merge,
        strict: true,
    };
    let report = commit(&pool, &payload, "o1", &options).await.unwrap();
    assert!(!report.ok);
    assert!(report.warnings.iter().any(|w| w.contains("strict")));
    assert_eq!(count_all(&pool, "suppliers").await, 0);

    let lenient = commit(&pool, &payload, "o1", &merge()).await.unwrap();
    assert!(lenient.ok);
    assert_eq!(count_all(&pool, "suppliers").await, 1);
}

#[tokio::test]
async fn rows_always_land_under_target_tenant() {
    let pool = migrated_pool().await;
    let payload = ImportPayload::from_value(supplier_payload("o1", &["a1"])).unwrap();
    let report = commit(&pool, &payload, "o3", &merge()).await.unwrap();
    assert!(report.ok);
    assert!(report.warnings.iter().any(|w| w.contains("\"o1\"")));
    assert_eq!(count(&pool, "suppliers", "o3").await, 1);
    assert_eq!(count(&pool, "suppliers", "o1").await, 0);
}

#[tokio::test]
async fn reserved_and_unscoped_tables_are_never_written() {
    let pool = migrated_pool().await;
    exec(&pool, "CREATE TABLE currencies (code TEXT PRIMARY KEY, label TEXT)").await;
    let payload = ImportPayload::from_value(json!({
        "users": [{"id": "u1", "email": "x@example.com", "password_hash": "h", "created_at": 1}],
        "currencies": [{"code": "EUR"}],
        "suppliers": [{"id": "a1", "name": "Acme"}]
    }))
    .unwrap();
    let report = commit(&pool, &payload, "o1", &merge()).await.unwrap();
    assert!(report.ok);
    assert_eq!(report.tables_skipped, vec!["currencies", "users"]);
    assert_eq!(report.tables_considered, 1);
    assert_eq!(count_all(&pool, "users").await, 0);
    assert_eq!(count_all(&pool, "currencies").await, 0);
    assert_eq!(count(&pool, "suppliers", "o1").await, 1);
}

#[tokio::test]
async fn commit_requires_tenant() {
    let pool = migrated_pool().await;
    let payload = ImportPayload::from_value(supplier_payload("o1", &["a1"])).unwrap();
    let err = commit(&pool, &payload, "", &merge()).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION/TENANT_REQUIRED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_for_different_tenants_both_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let pool = migrated_file_pool(dir.path()).await;
    let ids: Vec<String> = (0..200).map(|i| format!("s{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    for round in 0..5 {
        let a = ImportPayload::from_value(supplier_payload("a", &id_refs)).unwrap();
        let b = ImportPayload::from_value(supplier_payload("b", &id_refs)).unwrap();
        let options = merge();
        let tenant_a = format!("tenant-a-{round}");
        let tenant_b = format!("tenant-b-{round}");
        let (ra, rb) = tokio::join!(
            commit(&pool, &a, &tenant_a, &options),
            commit(&pool, &b, &tenant_b, &options)
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert!(ra.ok, "round {round}: {:?}", ra.warnings);
        assert!(rb.ok, "round {round}: {:?}", rb.warnings);
        assert_eq!(count(&pool, "suppliers", &format!("tenant-a-{round}")).await, 200);
        assert_eq!(count(&pool, "suppliers", &format!("tenant-b-{round}")).await, 200);
    }
    assert_eq!(count_all(&pool, "suppliers").await, 2000);
}

#[tokio::test]
async fn integer_beyond_i64_fails_the_commit() {
    let pool = migrated_pool().await;
    let payload = ImportPayload::from_value(json!({
        "suppliers": [{"id": "s1", "name": "Huge", "balance": u64::MAX}]
    }))
    .unwrap();
    let report = commit(&pool, &payload, "o1", &merge()).await.unwrap();
    assert!(!report.ok);
    assert!(report.warnings.iter().any(|w| w.contains("suppliers.balance")));
    assert_eq!(count(&pool, "suppliers", "o1").await, 0);
}
