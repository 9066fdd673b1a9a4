use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use ts_rs::TS;

/// Prefix shared by every error that stems from bad caller input.
pub const VALIDATION_PREFIX: &str = "VALIDATION/";

/// A structured application error that can be serialized and returned to HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[ts(as = "Option<HashMap<String, String>>", optional)]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Code for foreign errors that carry no code of their own.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";

    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    /// Construct a `VALIDATION/<kind>` error.
    pub fn validation(kind: &str, message: impl Into<String>) -> Self {
        AppError::new(format!("{VALIDATION_PREFIX}{kind}"), message)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// True when the error was caused by caller input rather than the server.
    pub fn is_validation(&self) -> bool {
        self.code.starts_with(VALIDATION_PREFIX)
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let mut pairs: Vec<_> = self.context.iter().collect();
            pairs.sort();
            for (key, value) in pairs {
                write!(f, " {key}={value}")?;
            }
        }
        Ok(())
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Walks an `anyhow` chain, keeping any `AppError` found along the way intact.
fn from_chain(err: &(dyn StdError + 'static)) -> AppError {
    if let Some(app) = err.downcast_ref::<AppError>() {
        return app.clone();
    }
    let root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
    match err.source() {
        Some(source) => root.with_cause(from_chain(source)),
        None => root,
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        from_chain(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let app_error = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os_code) => app_error.with_context("os_code", os_code.to_string()),
            None => app_error,
        }
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = match error.classify() {
            Category::Io => "JSON/IO",
            Category::Syntax => "JSON/SYNTAX",
            Category::Data => "JSON/DATA",
            Category::Eof => "JSON/EOF",
        };
        let (line, column) = (error.line(), error.column());
        let app_error = AppError::new(code, error.to_string());
        if line == 0 {
            return app_error;
        }
        app_error
            .with_context("line", line.to_string())
            .with_context("column", column.to_string())
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::Database(db) => {
                let code = match db.code() {
                    Some(code) => format!("Sqlite/{code}"),
                    None => "SQLX/DATABASE".to_string(),
                };
                let app_error = AppError::new(code, db.message());
                match db.constraint() {
                    Some(constraint) => app_error.with_context("constraint", constraint),
                    None => app_error,
                }
            }
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "no matching row"),
            SqlxError::PoolTimedOut => {
                AppError::new("SQLX/POOL_TIMEOUT", "timed out waiting for a connection")
            }
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "connection pool is closed"),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}
