//! MySQL Backup Tool
//!
//! Provides CLI interface for taking, verifying and rotating mysqldump backups

// mysqlbackup/src/main.rs
mod backup;
mod config;
mod errors;
mod report;
mod utils;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use backup::lock::DatabaseLock;
use config::{Overrides, ProcessEnv, RawJsonConfig};
use errors::{BackupError, ConfigError, ExecutionError};
use report::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "backup", version, about = "Back up a MySQL database with mysqldump")]
struct Cli {
    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON settings file with non-secret defaults
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dump, verify and rotate one database
    Run(RunArgs),
    /// Check that the database accepts a connection
    Check {
        /// Database name (defaults to DB_NAME)
        #[arg(long)]
        db: Option<String>,
    },
    /// List a database's backups, newest first
    List(LocationArgs),
    /// Delete all but the newest <keep> backups
    Prune {
        #[command(flatten)]
        location: LocationArgs,
        #[arg(long)]
        keep: NonZeroUsize,
    },
}

#[derive(Args, Debug)]
struct LocationArgs {
    /// Database name (defaults to DB_NAME)
    #[arg(long)]
    db: Option<String>,
    /// Output directory (defaults to BACKUP_DIR)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    location: LocationArgs,
    /// Kill the dump after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
    /// Keep this many newest backups and delete older ones
    #[arg(long)]
    keep: Option<NonZeroUsize>,
    /// Dump binary to run instead of mysqldump
    #[arg(long, value_name = "PATH")]
    dump_bin: Option<String>,
    /// Require mysqldump's header and completion trailer in the output
    #[arg(long)]
    verify_markers: bool,
    /// What to print on stdout on success
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };
    init_tracing(cli.verbose);

    match run_app(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("❌ Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run_app(cli: Cli) -> Result<u8> {
    let settings = RawJsonConfig::load_optional(cli.config.as_deref())
        .map_err(BackupError::from)
        .context("Failed to load settings file")?;

    match cli.command {
        Commands::Run(args) => {
            let overrides = Overrides {
                database: args.location.db,
                output_dir: args.location.out,
                timeout_secs: args.timeout,
                keep: args.keep,
                dump_binary: args.dump_bin,
                verify_markers: args.verify_markers,
            };
            // Dropping the flow on Ctrl-C kills the dump and releases the lock.
            let result = tokio::select! {
                result = backup::run_backup_flow(&ProcessEnv, &settings, &overrides) => result,
                _ = tokio::signal::ctrl_c() => Err(ExecutionError::Interrupted.into()),
            };
            let outcome = report::report(&result, args.format);
            outcome
                .emit(&mut std::io::stdout().lock())
                .context("Failed to write result to stdout")?;
            Ok(outcome.code)
        }
        Commands::Check { db } => {
            let connection = config::resolve_connection(&ProcessEnv, &settings, db.as_deref())
                .map_err(BackupError::from)
                .context("Failed to resolve connection settings")?;
            info!(host = %connection.host, port = connection.port, "Checking database connection");
            utils::setting::check_db_connection(&connection)
                .await
                .map_err(|reason| BackupError::from(ExecutionError::Unreachable(reason)))
                .context("Connection check failed")?;
            Ok(0)
        }
        Commands::List(location) => {
            let location = resolve_location(&settings, location)?;
            let entries =
                backup::retention::list_artifacts(&location.output_dir, &location.database)
                    .context("Failed to list backups")?;
            let mut out = std::io::stdout().lock();
            for entry in &entries {
                writeln!(out, "{}", entry.path.display()).context("Failed to write to stdout")?;
            }
            info!("Found {} backup(s) of {}", entries.len(), location.database);
            Ok(0)
        }
        Commands::Prune { location, keep } => {
            let location = resolve_location(&settings, location)?;
            // A missing directory has nothing to prune and nothing to lock.
            let _lock = if location.output_dir.is_dir() {
                let lock = DatabaseLock::acquire(&location.output_dir, &location.database)
                    .map_err(BackupError::from)
                    .context("Backup directory is in use")?;
                Some(lock)
            } else {
                None
            };
            let report =
                backup::retention::prune(&location.output_dir, &location.database, keep, None);
            let mut out = std::io::stdout().lock();
            for path in &report.removed {
                writeln!(out, "{}", path.display()).context("Failed to write to stdout")?;
            }
            Ok(if report.failures.is_empty() { 0 } else { 2 })
        }
    }
}

fn resolve_location(
    settings: &RawJsonConfig,
    args: LocationArgs,
) -> Result<config::ArtifactLocation> {
    let overrides = Overrides {
        database: args.db,
        output_dir: args.out,
        ..Overrides::default()
    };
    config::resolve_location(&ProcessEnv, settings, &overrides)
        .map_err(BackupError::from)
        .context("Failed to resolve backup location")
}

/// Exit code for errors raised outside the run pipeline.
fn exit_code_for(e: &anyhow::Error) -> u8 {
    if let Some(backup_error) = e.downcast_ref::<BackupError>() {
        backup_error.exit_code()
    } else if e.downcast_ref::<ConfigError>().is_some() {
        1
    } else {
        2
    }
}

/// Logs go to stderr so stdout carries only results.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
