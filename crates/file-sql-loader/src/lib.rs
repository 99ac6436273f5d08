//! # file-sql-loader
//!
//! Loads CSV, pipe-separated and JSON files into SQL Server tables whose
//! schema is inferred from the data.
//!
//! - **Type inference** over sampled column values, with manual VARCHAR
//!   length overrides
//! - **Table policies** for existing tables: drop and recreate, append, or fail
//! - **Strict** (all or nothing) and **tolerant** (row errors up to a
//!   threshold) transactional loads, with processed/error relocation and
//!   failure reports
//! - **Resumable directory batches** checkpointed through job statistics
//!
//! ## Example
//!
//! ```rust,no_run
//! use file_sql_loader::{Config, Orchestrator};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> file_sql_loader::Result<()> {
//!     let config = Config::load("loader_config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let summary = orchestrator.run(Path::new("incoming/")).await?;
//!     println!("{}", summary.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod loader;
pub mod orchestrator;
pub mod schema;
pub mod state;
pub mod target;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, TableMode, TransactionMode};
pub use core::{Row, SqlNullType, SqlValue};
pub use dataset::{Dataset, FileType};
pub use error::{LoadError, Result, RowConversionError};
pub use inference::{infer, ColumnProfile};
pub use loader::{LoadEngine, LoadOutcome, LoadState};
pub use orchestrator::{
    plan_file, BatchCheckpointManager, BatchSummary, FileSummary, Orchestrator, RunSummary,
};
pub use schema::{ColumnDecision, SchemaPlan, TableAction, TablePolicy};
pub use state::{BatchStatus, JobStatus, StatsBackend};
pub use target::{HealthCheckResult, MssqlTarget, TargetDb};
pub use typemap::SqlType;
