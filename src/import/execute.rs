use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{error, info, warn};

use super::batch::{abandon, begin_write, execute_batch};
use super::plan::{plan, tenant_warning};
use super::remap::IdentifierMap;
use super::value::json_to_param;
use super::{ImportError, ImportMode, ImportOptions, ImportPayload, ImportReport};
use crate::db::{quote_ident, SqlParam, Statement};
use crate::export::Row;
use crate::relations::{delete_order, foreign_keys, insert_order};
use crate::schema::{load_live_schema, LiveSchema, TableSchema, ID_COLUMN, TENANT_COLUMN};
use crate::{AppError, AppResult};

/// The statement list of one commit plus what it will do per table.
#[derive(Debug, Default)]
struct CommitBatch {
    statements: Vec<Statement>,
    inserted: BTreeMap<String, usize>,
    remapped: BTreeMap<String, usize>,
}

fn delete_statement(table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(TENANT_COLUMN)
    )
}

fn insert_statement(table: &TableSchema, row: &Row) -> Result<Statement, ImportError> {
    let mut columns = Vec::new();
    let mut params = Vec::new();
    for column in &table.columns {
        let Some(value) = row.get(column) else {
            continue;
        };
        let param = json_to_param(value).map_err(|reason| ImportError::InvalidValue {
            table: table.name.clone(),
            column: column.clone(),
            reason,
        })?;
        columns.push(quote_ident(column));
        params.push(param);
    }

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&table.name))
    } else {
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table.name),
            columns.join(", "),
            placeholders.join(", ")
        )
    };
    Ok(Statement::new(sql, params))
}

/// Identifiers a row of `table` may not reuse.
///
/// Read inside the commit's write transaction. In replace mode the tenant's
/// own rows are deleted in the same batch, so only other tenants'
/// identifiers count.
async fn taken_identifiers(
    conn: &mut SqliteConnection,
    table: &str,
    tenant_id: &str,
    mode: ImportMode,
) -> Result<Vec<Value>, ImportError> {
    let sql = match mode {
        ImportMode::Merge => format!(
            "SELECT {id} FROM {table} WHERE {id} IS NOT NULL",
            id = quote_ident(ID_COLUMN),
            table = quote_ident(table)
        ),
        ImportMode::Replace => format!(
            "SELECT {id} FROM {table} WHERE {id} IS NOT NULL AND {owner} IS NOT ?1",
            id = quote_ident(ID_COLUMN),
            table = quote_ident(table),
            owner = quote_ident(TENANT_COLUMN)
        ),
    };
    let mut query = sqlx::query(&sql);
    if mode == ImportMode::Replace {
        query = query.bind(tenant_id);
    }
    let rows = query
        .fetch_all(&mut *conn)
        .await
        .map_err(|source| ImportError::ReadIdentifiers {
            table: table.to_string(),
            source,
        })?;
    Ok(rows
        .iter()
        .filter_map(|row| crate::export::row_to_json(row).remove(ID_COLUMN))
        .collect())
}

async fn build_batch(
    conn: &mut SqliteConnection,
    payload: &ImportPayload,
    live: &LiveSchema,
    tables: &[&str],
    tenant_id: &str,
    mode: ImportMode,
) -> Result<CommitBatch, ImportError> {
    let mut batch = CommitBatch::default();

    if mode == ImportMode::Replace {
        for table in delete_order(live.tenant_tables().map(|t| t.name.as_str())) {
            batch.statements.push(Statement::new(
                delete_statement(table),
                vec![SqlParam::Text(tenant_id.to_string())],
            ));
        }
    }

    let mut ids = IdentifierMap::new();
    for &name in tables {
        let Some(table) = live.table(name) else {
            continue;
        };
        if table.has_id_column() && !payload.rows(name).is_empty() {
            let taken = taken_identifiers(conn, name, tenant_id, mode).await?;
            ids.reserve_existing(name, &taken);
        }
    }

    for &name in tables {
        let Some(table) = live.table(name) else {
            continue;
        };
        let rows = payload.rows(name);
        for source in rows {
            let mut row = source.clone();
            if table.has_tenant_column() {
                row.insert(TENANT_COLUMN.to_string(), Value::from(tenant_id));
            }
            if table.has_id_column() {
                if let Some(id) = row.get(ID_COLUMN).filter(|id| !id.is_null()) {
                    let stored = ids.assign(name, id);
                    row.insert(ID_COLUMN.to_string(), stored);
                }
            }
            for fk in foreign_keys(name) {
                let Some(current) = row.get(fk.column).filter(|v| !v.is_null()) else {
                    continue;
                };
                if let Some(mapped) = ids.resolve(fk.references, current) {
                    let mapped = mapped.clone();
                    row.insert(fk.column.to_string(), mapped);
                }
            }
            batch.statements.push(insert_statement(table, &row)?);
        }
        batch.inserted.insert(name.to_string(), rows.len());
        batch.remapped.insert(name.to_string(), ids.remapped(name));
    }

    Ok(batch)
}

/// Write a payload into the database under `tenant_id`.
///
/// Failures while preparing or executing the batch do not surface as errors:
/// they produce a report with `ok: false` so the per-table diagnostics
/// survive. Only a missing tenant id or an unreadable schema is an `Err`.
/// Concurrent commits are serialised by the write transaction; the HTTP
/// layer also holds the tenant's lock around this.
pub async fn commit(
    pool: &SqlitePool,
    payload: &ImportPayload,
    tenant_id: &str,
    options: &ImportOptions,
) -> AppResult<ImportReport> {
    if tenant_id.trim().is_empty() {
        return Err(AppError::validation(
            "TENANT_REQUIRED",
            "ownerId is required to commit an import",
        ));
    }

    let start = Instant::now();
    let live = load_live_schema(pool).await?;
    let mut report = plan(payload, &live, options);
    report.dry_run = false;
    if let Some(warning) = tenant_warning(payload, tenant_id) {
        report.warn(warning);
    }

    if options.strict && report.drifting_tables().next().is_some() {
        warn!(
            target: "recordkeep",
            event = "import_refused_strict",
            tenant_id = %tenant_id,
            drifting = report.drifting_tables().count()
        );
        report.fail("import refused: strict mode does not allow dropping file fields");
        return Ok(report);
    }

    let tables: Vec<&str> = insert_order(report.tables.iter().map(|t| t.table.as_str()));
    let outcome = match begin_write(pool).await {
        Ok(mut tx) => {
            match build_batch(&mut tx, payload, &live, &tables, tenant_id, options.mode).await {
                Ok(batch) => execute_batch(tx, &batch.statements).await.map(|_| batch),
                Err(err) => Err(abandon(tx, err).await),
            }
        }
        Err(failure) => Err(failure),
    };

    match outcome {
        Ok(batch) => {
            for table in &mut report.tables {
                table.inserted = batch.inserted.get(&table.table).copied().or(Some(0));
                table.remapped = batch.remapped.get(&table.table).copied().or(Some(0));
            }
            info!(
                target: "recordkeep",
                event = "import_commit",
                tenant_id = %tenant_id,
                mode = %options.mode,
                statements = batch.statements.len(),
                rows = batch.inserted.values().sum::<usize>(),
                remapped = batch.remapped.values().sum::<usize>(),
                ms = start.elapsed().as_millis() as u64
            );
        }
        Err(failure) => {
            error!(
                target: "recordkeep",
                event = "import_commit_failed",
                tenant_id = %tenant_id,
                mode = %options.mode,
                state_unknown = failure.state_unknown,
                error = %failure.error
            );
            report.fail(format!("commit failed: {}", failure.error));
            if failure.state_unknown {
                report.warn("database state is unknown after a failed rollback; verify data before relying on it");
            }
        }
    }

    Ok(report)
}
