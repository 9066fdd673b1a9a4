use std::time::Instant;

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{error, info, warn};

use super::ImportError;
use crate::db::Statement;

/// Why a batch did not commit, and whether the rollback is known to have happened.
#[derive(Debug)]
pub struct BatchFailure {
    pub error: ImportError,
    /// Set when the database may hold part of the batch.
    pub state_unknown: bool,
}

impl BatchFailure {
    fn known(error: ImportError) -> Self {
        Self {
            error,
            state_unknown: false,
        }
    }
}

/// Open the write transaction a commit runs in.
///
/// `BEGIN IMMEDIATE` takes the database write lock up front, so identifiers
/// read inside the transaction stay free until it commits. Concurrent writers
/// wait on the busy timeout instead of racing.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, BatchFailure> {
    let tx = pool
        .begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(|err| BatchFailure::known(ImportError::Begin(err)))?;
    info!(target: "recordkeep", event = "db_tx_begin");
    Ok(tx)
}

/// Roll `tx` back after `error`, reporting whether the rollback landed.
pub async fn abandon(tx: Transaction<'_, Sqlite>, error: ImportError) -> BatchFailure {
    match tx.rollback().await {
        Ok(()) => {
            warn!(target: "recordkeep", event = "db_tx_rollback", error = %error);
            BatchFailure::known(error)
        }
        Err(rb) => {
            error!(target: "recordkeep", event = "db_tx_rollback_failed", error = %rb);
            BatchFailure {
                error,
                state_unknown: true,
            }
        }
    }
}

/// Execute every statement inside `tx`, then commit it.
///
/// Either all statements apply or none do. Returns the total number of rows
/// affected on success.
pub async fn execute_batch(
    mut tx: Transaction<'_, Sqlite>,
    statements: &[Statement],
) -> Result<u64, BatchFailure> {
    let start = Instant::now();
    let total = statements.len();

    let mut affected = 0_u64;
    for (index, statement) in statements.iter().enumerate() {
        match statement.query().execute(&mut *tx).await {
            Ok(done) => affected += done.rows_affected(),
            Err(source) => {
                let failure = ImportError::Statement {
                    index: index + 1,
                    total,
                    source,
                };
                return Err(abandon(tx, failure).await);
            }
        }
    }

    if let Err(err) = tx.commit().await {
        error!(target: "recordkeep", event = "db_tx_commit_failed", error = %err);
        return Err(BatchFailure {
            error: ImportError::Commit(err),
            state_unknown: true,
        });
    }
    info!(
        target: "recordkeep",
        event = "db_tx_commit",
        statements = total,
        rows_affected = affected,
        ms = start.elapsed().as_millis() as u64
    );
    Ok(affected)
}
