use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TableReport {
    pub table: String,
    #[ts(type = "number")]
    pub rows_in_file: usize,
    #[serde(rename = "columnsInDB")]
    pub columns_in_db: Vec<String>,
    /// Fields in the file with no destination column; dropped on insert.
    pub missing_columns: Vec<String>,
    /// Destination columns absent from the file; left to their defaults.
    pub extra_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub inserted: Option<usize>,
    /// Rows that were given a fresh identifier because theirs was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub remapped: Option<usize>,
}

impl TableReport {
    pub fn has_drift(&self) -> bool {
        !self.missing_columns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ImportReport {
    pub dry_run: bool,
    pub ok: bool,
    #[ts(type = "number")]
    pub tables_considered: usize,
    #[serde(rename = "tablesMissingInDB")]
    pub tables_missing_in_db: Vec<String>,
    pub tables_skipped: Vec<String>,
    pub tables: Vec<TableReport>,
    pub warnings: Vec<String>,
}

impl ImportReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ok: true,
            tables_considered: 0,
            tables_missing_in_db: Vec::new(),
            tables_skipped: Vec::new(),
            tables: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableReport> {
        self.tables.iter_mut().find(|t| t.table == name)
    }

    pub fn drifting_tables(&self) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(|t| t.has_drift())
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Collapse to a failed commit: nothing counts as inserted.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.ok = false;
        for table in &mut self.tables {
            table.inserted = None;
            table.remapped = None;
        }
        self.warn(message);
    }
}
