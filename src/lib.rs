//! Tenant-scoped backup and restore for the business records database.
//!
//! [`export::export_tenant`] snapshots every row a tenant owns into one JSON
//! document. [`import::dry_run`] compares such a document with the live
//! schema, and [`import::commit`] writes it back, giving colliding rows
//! fresh identifiers and following them through foreign keys.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod http;
pub mod import;
pub mod logging;
pub mod migrate;
pub mod relations;
pub mod schema;
pub mod state;
pub mod time;
mod util;

pub use error::{AppError, AppResult};
