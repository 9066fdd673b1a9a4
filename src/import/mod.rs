mod batch;
mod execute;
mod locks;
mod payload;
mod plan;
mod remap;
mod report;
mod value;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::AppError;

pub use batch::{begin_write, execute_batch, BatchFailure};
pub use execute::commit;
pub use locks::TenantLocks;
pub use payload::ImportPayload;
pub use plan::{dry_run, plan};
pub use remap::IdentifierMap;
pub use report::{ImportReport, TableReport};
pub use value::json_to_param;

/// How a commit treats rows the tenant already has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ImportMode {
    /// Keep existing rows and add the file's rows beside them.
    #[default]
    Merge,
    /// Delete every row of the tenant, then insert the file's rows.
    Replace,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::Merge => "merge",
            ImportMode::Replace => "replace",
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportMode {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(ImportMode::Merge),
            "replace" => Ok(ImportMode::Replace),
            other => Err(AppError::validation(
                "MODE",
                format!("unknown import mode {other:?}; expected merge or replace"),
            )
            .with_context("mode", raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// Refuse to commit when the file carries fields the destination has no column for.
    pub strict: bool,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{table}.{column}: {reason}")]
    InvalidValue {
        table: String,
        column: String,
        reason: String,
    },
    #[error("failed to read identifiers of {table}: {source}")]
    ReadIdentifiers {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),
    #[error("statement {index} of {total} failed: {source}")]
    Statement {
        index: usize,
        total: usize,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),
}
