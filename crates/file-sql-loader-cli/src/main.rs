//! file-sql-loader CLI - load CSV/PSV/JSON files into SQL Server.

use clap::{Parser, Subcommand};
use file_sql_loader::config::{DdlConfig, LoggingConfig};
use file_sql_loader::{
    plan_file, BatchSummary, Config, FileSummary, LoadError, MssqlTarget, Orchestrator,
    RunSummary, TargetDb,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "file-sql-loader")]
#[command(about = "Schema-inferring CSV/PSV/JSON loader for SQL Server")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "loader_config.yaml", global = true)]
    config: PathBuf,

    /// Output JSON instead of text
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error (default: logging.level from config)
    #[arg(long, global = true)]
    verbosity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a single file, or every file of a directory as one batch
    Run {
        /// File or directory to load
        input_path: PathBuf,
    },

    /// Show the inferred table and DDL for a file without connecting
    Plan {
        /// File to inspect
        file: PathBuf,
    },

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, LoadError> {
    let cli = Cli::parse();
    let run_id = Uuid::new_v4();

    match cli.command {
        Commands::Run { ref input_path } => {
            let config = Config::load(&cli.config)?;
            setup_logging(&cli, &config.logging, run_id)?;
            info!("Loader run {} using {}", run_id, cli.config.display());

            let orchestrator = Orchestrator::new(config)
                .await?
                .with_cancel(spawn_signal_handler());
            let summary = orchestrator.run(input_path).await?;

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                print_summary(&summary);
            }

            if !summary.succeeded() {
                return Ok(ExitCode::from(4));
            }
        }

        Commands::Plan { ref file } => {
            // Offline: a missing config file means default DDL options.
            let config = if cli.config.exists() {
                Some(Config::load(&cli.config)?)
            } else {
                None
            };
            let logging = config.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
            setup_logging(&cli, &logging, run_id)?;

            let ddl = config.as_ref().map(|c| c.ddl.clone()).unwrap_or_else(DdlConfig::default);
            let tables = config
                .as_ref()
                .map(|c| c.tables.clone())
                .unwrap_or_else(BTreeMap::new);
            let schema = config
                .as_ref()
                .map(|c| c.database.schema.as_str())
                .unwrap_or("dbo");

            let (dataset, plan) = plan_file(file, &ddl, &tables).await?;
            let ddl_sql = plan.create_table_sql(schema);

            if cli.output_json {
                let output = serde_json::json!({
                    "file": file.display().to_string(),
                    "file_type": dataset.file_type().to_string(),
                    "rows": dataset.row_count(),
                    "table_name": plan.table_name,
                    "columns": plan.columns,
                    "ddl": ddl_sql,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("File: {}", file.display());
                println!(
                    "  Type: {} ({} rows)",
                    dataset.file_type(),
                    dataset.row_count()
                );
                println!("  Table: {}", plan.table_name);
                println!("\nColumns:");
                for column in &plan.columns {
                    println!(
                        "  {:<30} {:<16} {}",
                        column.name,
                        column.sql_type.to_string(),
                        if column.nullable { "NULL" } else { "NOT NULL" }
                    );
                }
                println!("\n{};", ddl_sql);
            }
        }

        Commands::HealthCheck => {
            let config = Config::load(&cli.config)?;
            setup_logging(&cli, &config.logging, run_id)?;

            let target = MssqlTarget::new(&config.database).await?;
            let result = target.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target (MSSQL {}:{}/{}): {} ({}ms)",
                    config.database.host,
                    config.database.port,
                    config.database.database,
                    if result.connected { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
            }

            if !result.connected {
                return Err(LoadError::transient(
                    result.error.unwrap_or_else(|| "Health check failed".to_string()),
                ));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary) {
    match summary {
        RunSummary::File(file) => print_file(file),
        RunSummary::Batch(batch) => print_batch(batch),
    }
}

fn print_file(file: &FileSummary) {
    println!("File: {}", file.source_file);
    println!("  Status: {}", file.status);
    println!("  Table: {}", file.target_table);
    println!(
        "  Rows: {} read, {} inserted, {} failed",
        file.rows_read, file.rows_inserted, file.rows_failed
    );
    if file.attempts > 1 {
        println!("  Attempts: {}", file.attempts);
    }
    if let Some(ref path) = file.relocated_to {
        println!("  Moved to: {}", path.display());
    }
    if let Some(ref path) = file.report {
        println!("  Report: {}", path.display());
    }
    if let Some(ref err) = file.error {
        println!("  Error: {}", err);
    }
}

fn print_batch(batch: &BatchSummary) {
    println!("Batch {}", batch.batch_job_id);
    println!("  Directory: {}", batch.directory);
    println!(
        "  Status: {}{}",
        batch.status,
        if batch.is_resumed { " (resumed)" } else { "" }
    );
    println!(
        "  Files: {} processed, {} failed, {} total",
        batch.files_processed, batch.files_failed, batch.total_files
    );
    println!("  Duration: {:.2}s", batch.duration_seconds);
    for file in &batch.files {
        println!();
        print_file(file);
    }
}

fn setup_logging(cli: &Cli, logging: &LoggingConfig, run_id: Uuid) -> Result<(), LoadError> {
    let verbosity = cli.verbosity.as_deref().unwrap_or(&logging.level);
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cli.log_format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(false)
            .boxed()
    };

    let file_layer = if logging.enabled {
        let file = open_log_file(&logging.path, run_id)?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// `{dir}/load_job_{run_id}.log`
fn open_log_file(dir: &Path, run_id: Uuid) -> Result<File, LoadError> {
    std::fs::create_dir_all(dir)?;
    Ok(File::create(dir.join(format!("load_job_{}.log", run_id)))?)
}

/// Returns a receiver that turns true on SIGINT (Ctrl-C) or SIGTERM.
/// A directory run stops before its next file; the batch stays resumable.
fn spawn_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let name = shutdown_signal().await;
        eprintln!(
            "\nReceived {}. Stopping after the current file...",
            name
        );
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}
