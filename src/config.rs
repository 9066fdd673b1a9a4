use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

pub const APP_DIR_NAME: &str = "recordkeep";
pub const DB_FILE_NAME: &str = "recordkeep.sqlite3";
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
/// Backups of busy tenants easily exceed the 2 MiB axum default.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Path to the SQLite database file.
    #[arg(long, global = true, env = "RECORDKEEP_DB")]
    pub db: Option<PathBuf>,

    /// Directory for daily-rotated JSON log files (stderr only when unset).
    #[arg(long, global = true, env = "RECORDKEEP_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.db {
            Some(path) => Ok(path.clone()),
            None => default_db_path(),
        }
    }
}

/// Options for the HTTP server.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Socket address to listen on.
    #[arg(long, env = "RECORDKEEP_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Largest accepted import body, in bytes.
    #[arg(long, env = "RECORDKEEP_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Do not apply the embedded schema migrations on startup.
    #[arg(long)]
    pub skip_migrations: bool,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub bind: SocketAddr,
    pub max_body_bytes: usize,
    pub apply_migrations: bool,
}

impl ServerConfig {
    pub fn resolve(global: &GlobalArgs, serve: &ServeArgs) -> Result<Self> {
        Ok(Self {
            db_path: global.db_path()?,
            bind: serve.bind,
            max_body_bytes: serve.max_body_bytes,
            apply_migrations: !serve.skip_migrations,
        })
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => std::env::current_dir().context("determine current directory")?,
    };
    Ok(base.join(APP_DIR_NAME).join(DB_FILE_NAME))
}
