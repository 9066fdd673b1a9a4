use std::collections::HashSet;

use sqlx::SqlitePool;
use tracing::info;

use super::{ImportOptions, ImportPayload, ImportReport, TableReport};
use crate::export::Row;
use crate::relations::{insert_order, relation};
use crate::schema::{load_live_schema, LiveSchema, TableSchema};
use crate::AppResult;

/// Union of field names across `rows`, in order of first appearance.
fn file_fields(rows: &[Row]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                fields.push(key.clone());
            }
        }
    }
    fields
}

fn table_report(table: &TableSchema, rows: &[Row]) -> TableReport {
    let fields = file_fields(rows);
    let missing_columns = fields
        .iter()
        .filter(|field| !table.has_column(field))
        .cloned()
        .collect();
    let extra_fields = table
        .columns
        .iter()
        .filter(|column| !fields.contains(column))
        .cloned()
        .collect();

    TableReport {
        table: table.name.clone(),
        rows_in_file: rows.len(),
        columns_in_db: table.columns.clone(),
        missing_columns,
        extra_fields,
        inserted: None,
        remapped: None,
    }
}

/// Compare a payload with the live schema without touching the database.
pub fn plan(payload: &ImportPayload, live: &LiveSchema, options: &ImportOptions) -> ImportReport {
    let mut report = ImportReport::new(true);

    for name in insert_order(payload.table_names()) {
        if live.is_reserved(name) {
            report.tables_skipped.push(name.to_string());
            continue;
        }
        let Some(table) = live.table(name) else {
            report.tables_missing_in_db.push(name.to_string());
            continue;
        };
        if !table.has_tenant_column() {
            report.tables_skipped.push(name.to_string());
            continue;
        }
        report.tables.push(table_report(table, payload.rows(name)));
    }
    report.tables_considered = report.tables.len();

    let drift: Vec<String> = report
        .drifting_tables()
        .map(|t| {
            format!(
                "{}: file fields without a column will be dropped: {}",
                t.table,
                t.missing_columns.join(", ")
            )
        })
        .collect();
    report.warnings.extend(drift);

    let unmapped: Vec<String> = report
        .tables
        .iter()
        .filter(|t| t.rows_in_file > 0 && relation(&t.table).is_none())
        .map(|t| {
            format!(
                "{}: not in the relation graph; inserted after known tables in name order \
                 and its references are not remapped",
                t.table
            )
        })
        .collect();
    report.warnings.extend(unmapped);

    if options.strict && report.drifting_tables().next().is_some() {
        report.ok = false;
        report.warn("strict mode: commit would be refused because of schema drift");
    }
    report
}

pub(crate) fn tenant_warning(payload: &ImportPayload, tenant_id: &str) -> Option<String> {
    match payload.source_tenant() {
        Some(source) if source != tenant_id => Some(format!(
            "file was exported for tenant {source:?}; rows will be imported under {tenant_id:?}"
        )),
        _ => None,
    }
}

/// Load the live schema and report what a commit would do.
pub async fn dry_run(
    pool: &SqlitePool,
    payload: &ImportPayload,
    tenant_id: Option<&str>,
    options: &ImportOptions,
) -> AppResult<ImportReport> {
    let live = load_live_schema(pool).await?;
    let mut report = plan(payload, &live, options);
    if let Some(warning) = tenant_id
        .filter(|id| !id.trim().is_empty())
        .and_then(|id| tenant_warning(payload, id))
    {
        report.warn(warning);
    }

    info!(
        target: "recordkeep",
        event = "import_dry_run",
        mode = %options.mode,
        tables_considered = report.tables_considered,
        tables_missing = report.tables_missing_in_db.len(),
        tables_skipped = report.tables_skipped.len(),
        warnings = report.warnings.len()
    );
    Ok(report)
}
