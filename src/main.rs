use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use recordkeep_lib::config::{GlobalArgs, ServeArgs, ServerConfig};
use recordkeep_lib::import::{self, ImportMode, ImportOptions, ImportPayload};
use recordkeep_lib::state::AppState;
use recordkeep_lib::{db, export, http, logging, migrate};

/// Exit code for an import whose report came back with `ok: false`.
const IMPORT_NOT_OK_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "recordkeep", about = "Tenant backup and restore service", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the export and import endpoints over HTTP.
    Serve(ServeArgs),
    /// Write one tenant's snapshot as JSON.
    Export {
        #[arg(long)]
        owner_id: String,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check a snapshot against the database, or write it with --commit.
    Import {
        /// Target tenant; required with --commit.
        #[arg(long)]
        owner_id: Option<String>,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "merge")]
        mode: ImportMode,
        #[arg(long)]
        commit: bool,
        /// Refuse to commit when file fields would be dropped.
        #[arg(long)]
        strict: bool,
    },
    /// Apply the embedded schema migrations and exit.
    Migrate,
}

fn main() {
    let cli = Cli::parse();
    let log_guard = match logging::init(cli.global.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            process::exit(1);
        }
    };

    let code = match runtime.block_on(handle_cli(cli)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    drop(log_guard);
    process::exit(code);
}

async fn open(global: &GlobalArgs) -> Result<SqlitePool> {
    let path = global.db_path()?;
    db::open_sqlite_pool(&path).await
}

async fn handle_cli(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Serve(args) => {
            let config = ServerConfig::resolve(&cli.global, &args)?;
            let pool = db::open_sqlite_pool(&config.db_path).await?;
            if config.apply_migrations {
                migrate::apply_migrations(&pool).await?;
            }
            let state = AppState::new(pool).with_max_body_bytes(config.max_body_bytes);
            http::serve(state, config.bind).await?;
            Ok(0)
        }
        Commands::Export { owner_id, out } => {
            let pool = open(&cli.global).await?;
            let payload = export::export_tenant(&pool, &owner_id).await?;
            let json = serde_json::to_string_pretty(&payload).context("serialize export")?;
            write_output(out.as_deref(), &json)?;
            pool.close().await;
            Ok(0)
        }
        Commands::Import {
            owner_id,
            file,
            mode,
            commit,
            strict,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("read import file {}", file.display()))?;
            let payload = ImportPayload::from_slice(&bytes)?;
            let options = ImportOptions { mode, strict };
            let pool = open(&cli.global).await?;
            let report = if commit {
                let owner = owner_id
                    .as_deref()
                    .context("--owner-id is required with --commit")?;
                import::commit(&pool, &payload, owner, &options).await?
            } else {
                import::dry_run(&pool, &payload, owner_id.as_deref(), &options).await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            pool.close().await;
            Ok(if report.ok { 0 } else { IMPORT_NOT_OK_EXIT_CODE })
        }
        Commands::Migrate => {
            let pool = open(&cli.global).await?;
            migrate::apply_migrations(&pool).await?;
            pool.close().await;
            println!("migrations applied");
            Ok(0)
        }
    }
}

fn write_output(out: Option<&Path>, json: &str) -> Result<()> {
    match out {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("write export to {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
