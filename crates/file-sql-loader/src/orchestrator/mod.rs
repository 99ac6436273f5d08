//! Load orchestrator - main workflow coordinator.
//!
//! One file goes through detect → read → infer → plan → table policy →
//! load → relocate → statistics. A directory run wraps every file in a
//! retry loop and checkpoints the batch after each file.

pub mod checkpoint;

pub use checkpoint::BatchCheckpointManager;

use crate::config::{Config, DdlConfig, StatsBackendKind, TableOverrides};
use crate::dataset::Dataset;
use crate::error::{LoadError, Result};
use crate::inference::infer;
use crate::loader::{Destination, LoadDirs, LoadEngine};
use crate::schema::{table_name_for, SchemaPlan, TablePolicy};
use crate::state::mssql_db::StatsTables;
use crate::state::{
    BatchStatus, ErrorLogEntry, FileStatsBackend, JobStatistics, JobStatus, MssqlStatsBackend,
    NoOpStatsBackend, StatsBackend,
};
use crate::target::{MssqlTarget, TargetDb};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Load orchestrator.
pub struct Orchestrator {
    config: Config,
    target: Arc<dyn TargetDb>,
    stats: Arc<dyn StatsBackend>,
    error_log: Option<Arc<dyn StatsBackend>>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Result of processing one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub job_run_id: Uuid,
    pub source_file: String,
    pub target_table: String,
    pub status: JobStatus,
    pub rows_read: usize,
    pub rows_inserted: usize,
    pub rows_failed: usize,
    pub attempts: u32,
    /// Where the file ended up; `None` if it was left in place.
    pub relocated_to: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub error: Option<String>,
}

impl FileSummary {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Result of a directory run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_job_id: Uuid,
    pub directory: String,
    pub status: BatchStatus,
    pub is_resumed: bool,
    pub total_files: i64,
    pub files_processed: i64,
    pub files_failed: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Files handled by this run, in processing order.
    pub files: Vec<FileSummary>,
}

/// Result of [`Orchestrator::run`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunSummary {
    File(FileSummary),
    Batch(BatchSummary),
}

impl RunSummary {
    /// Whether every file of the run was loaded.
    pub fn succeeded(&self) -> bool {
        match self {
            RunSummary::File(f) => f.succeeded(),
            RunSummary::Batch(b) => b.status == BatchStatus::Completed,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Read `path` and derive its table plan, without touching the database.
pub async fn plan_file(
    path: &Path,
    ddl: &DdlConfig,
    tables: &BTreeMap<String, TableOverrides>,
) -> Result<(Dataset, SchemaPlan)> {
    let dataset = Dataset::read(path).await?;
    let plan = plan_dataset(&dataset, ddl, tables);
    Ok((dataset, plan))
}

fn plan_dataset(
    dataset: &Dataset,
    ddl: &DdlConfig,
    tables: &BTreeMap<String, TableOverrides>,
) -> SchemaPlan {
    let table_name = table_name_for(dataset.source());
    let profiles = infer(dataset);
    SchemaPlan::build(&table_name, &profiles, ddl, tables.get(&table_name))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Orchestrator {
    /// Connect to the destination and set up statistics storage.
    pub async fn new(config: Config) -> Result<Self> {
        let mssql = Arc::new(MssqlTarget::new(&config.database).await?);
        let target: Arc<dyn TargetDb> = mssql.clone();

        let wants_backend = config.job_statistics.enabled || config.error_logging.enabled;
        let backend: Arc<dyn StatsBackend> = if !wants_backend {
            Arc::new(NoOpStatsBackend::new())
        } else {
            match config.job_statistics.backend {
                StatsBackendKind::Database => Arc::new(MssqlStatsBackend::new(
                    mssql,
                    StatsTables {
                        job: config.job_statistics.table_name.clone(),
                        batch: config.job_statistics.batch_table_name.clone(),
                        error: config.error_logging.table_name.clone(),
                    },
                )),
                StatsBackendKind::File => {
                    let path = config.job_statistics.state_file.clone().ok_or_else(|| {
                        LoadError::Config("job_statistics.state_file is required".into())
                    })?;
                    Arc::new(FileStatsBackend::open(path)?)
                }
            }
        };
        backend.init_schema().await?;
        info!("Statistics backend: {}", backend.backend_type());

        let stats: Arc<dyn StatsBackend> = if config.job_statistics.enabled {
            backend.clone()
        } else {
            Arc::new(NoOpStatsBackend::new())
        };
        let error_log = config.error_logging.enabled.then_some(backend);

        Ok(Self::with_backends(config, target, stats, error_log))
    }

    /// Build an orchestrator from existing backends.
    pub fn with_backends(
        config: Config,
        target: Arc<dyn TargetDb>,
        stats: Arc<dyn StatsBackend>,
        error_log: Option<Arc<dyn StatsBackend>>,
    ) -> Self {
        Self {
            config,
            target,
            stats,
            error_log,
            cancel: None,
        }
    }

    /// Stop a directory run before the next file once `cancel` turns true.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| *c.borrow())
    }

    /// Process a single file or every file of a directory.
    pub async fn run(&self, input: &Path) -> Result<RunSummary> {
        let metadata = match tokio::fs::metadata(input).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoadError::FileNotFound(input.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            Ok(RunSummary::Batch(self.run_directory(input).await?))
        } else {
            Ok(RunSummary::File(self.run_file(input).await?))
        }
    }

    /// Process one file once, without retries or a batch.
    pub async fn run_file(&self, path: &Path) -> Result<FileSummary> {
        info!("Starting to process file: {}", path.display());
        match self.process_file(path, None, true).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!("Processing {} failed: {}", path.display(), e);
                let stats = JobStatistics::failed(
                    path_string(path),
                    table_name_for(path),
                    e.to_string(),
                    None,
                );
                self.write_statistics(&stats).await;
                Err(e)
            }
        }
    }

    /// Process every regular file of `dir` as one resumable batch.
    pub async fn run_directory(&self, dir: &Path) -> Result<BatchSummary> {
        let started_at = Utc::now();
        let dir = tokio::fs::canonicalize(dir).await?;
        let directory = path_string(&dir);
        info!("Starting batch processing for directory: {}", directory);

        let all_files = list_files(&dir).await?;
        let mut checkpoint = BatchCheckpointManager::start(
            self.stats.clone(),
            &self.config.batch_processing,
            &directory,
            &all_files,
        )
        .await?;

        let pending: Vec<String> = checkpoint
            .pending_files(&all_files)
            .into_iter()
            .cloned()
            .collect();
        if pending.is_empty() {
            info!("No pending files to process in {}", directory);
        } else {
            info!(
                "Processing {} pending files out of {} total files",
                pending.len(),
                all_files.len()
            );
        }

        let mut files = Vec::with_capacity(pending.len());
        for file in &pending {
            if self.cancelled() {
                info!("Cancellation requested, stopping before {}", file);
                checkpoint.abandon().await;
                return Err(LoadError::Cancelled);
            }
            let summary = self
                .process_with_retry(Path::new(file), checkpoint.batch_job_id())
                .await;
            if let Err(e) = checkpoint.record_outcome(file, summary.status).await {
                checkpoint.abandon().await;
                return Err(e);
            }
            files.push(summary);
        }

        let status = checkpoint.finish().await?;
        let record = checkpoint.record();
        let completed_at = Utc::now();

        Ok(BatchSummary {
            batch_job_id: record.batch_job_id,
            directory,
            status,
            is_resumed: record.is_resumed,
            total_files: record.total_files,
            files_processed: record.files_processed,
            files_failed: record.files_failed,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            files,
        })
    }

    /// Attempt a file up to `max_retries + 1` times. Only errors are retried;
    /// a file that was loaded or rejected is final.
    async fn process_with_retry(&self, path: &Path, batch_job_id: Uuid) -> FileSummary {
        let attempts = self.config.loader.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .process_file(path, Some(batch_job_id), attempt == attempts)
                .await
            {
                Ok(mut summary) => {
                    summary.attempts = attempt;
                    return summary;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Attempt {}/{} failed for file {}: {}",
                        attempt,
                        attempts,
                        path.display(),
                        e
                    );
                }
                Err(e) => {
                    error!(
                        "All {} attempts failed for file {}. Marking as failed: {}",
                        attempts,
                        path.display(),
                        e
                    );
                    let stats = JobStatistics::failed(
                        path_string(path),
                        table_name_for(path),
                        e.to_string(),
                        Some(batch_job_id),
                    );
                    self.write_statistics(&stats).await;
                    return FileSummary {
                        job_run_id: stats.job_run_id,
                        source_file: stats.source_file,
                        target_table: stats.target_table,
                        status: JobStatus::Failed,
                        rows_read: 0,
                        rows_inserted: 0,
                        rows_failed: 0,
                        attempts: attempt,
                        relocated_to: None,
                        report: None,
                        error: Some(e.to_string()),
                    };
                }
            }
        }
    }

    /// One attempt at one file. Returns `Err` only for failures worth retrying.
    async fn process_file(
        &self,
        path: &Path,
        batch_job_id: Option<Uuid>,
        final_attempt: bool,
    ) -> Result<FileSummary> {
        let job_run_id = Uuid::new_v4();
        let start = Utc::now();
        let source_file = path_string(path);
        let table_name = table_name_for(path);

        if !tokio::fs::try_exists(path).await? {
            return Err(LoadError::FileNotFound(path.to_path_buf()));
        }
        let dirs = LoadDirs::for_file(path);
        dirs.ensure().await?;

        let dataset = match Dataset::read(path).await {
            Ok(dataset) => dataset,
            Err(e @ LoadError::FileTypeUndetectable { .. }) => {
                return self
                    .reject_file(path, &dirs, &table_name, job_run_id, start, batch_job_id, e)
                    .await;
            }
            Err(e) => return Err(e),
        };
        info!(
            "Detected file type: {} ({} rows, {} columns)",
            dataset.file_type(),
            dataset.row_count(),
            dataset.columns().len()
        );
        info!("Target table: {}", table_name);

        let plan = plan_dataset(&dataset, &self.config.ddl, &self.config.tables);
        let policy = TablePolicy::new(self.config.loader.table_mode);
        match policy.prepare(self.target.as_ref(), &plan).await {
            Ok(action) => debug!("Table {}: {:?}", table_name, action),
            Err(e @ LoadError::TableConflict(_)) => {
                return self
                    .reject_file(path, &dirs, &table_name, job_run_id, start, batch_job_id, e)
                    .await;
            }
            Err(e) => return Err(e),
        }

        let engine = LoadEngine::new(
            self.target.as_ref(),
            self.config.loader.transaction_mode,
            self.config.loader.max_row_errors,
        )
        .final_attempt(final_attempt);
        let outcome = engine.load(&dataset, &plan, &dirs, job_run_id).await?;

        let end = Utc::now();
        let status = if outcome.rejected() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        let stats = JobStatistics {
            job_run_id,
            start_time: start,
            end_time: end,
            duration_seconds: (end - start).num_seconds(),
            status,
            source_file: source_file.clone(),
            target_table: table_name.clone(),
            rows_read: outcome.total_rows as i64,
            rows_inserted: outcome.successful_rows as i64,
            rows_updated: 0,
            rows_failed: outcome.failed_rows as i64,
            error_message: outcome.reason.clone(),
            batch_job_id,
        };
        self.write_statistics(&stats).await;

        for (row, source) in &outcome.conversion_errors {
            let column = source.column().to_string();
            let err = LoadError::RowConversion {
                row: *row,
                source: source.clone(),
            };
            self.write_error(job_run_id, &table_name, Some(column), &err)
                .await;
        }

        if status == JobStatus::Completed {
            info!("Successfully processed file: {}", source_file);
        } else {
            warn!(
                "File {} was not loaded: {}",
                source_file,
                outcome.reason.as_deref().unwrap_or("rejected")
            );
        }

        Ok(FileSummary {
            job_run_id,
            source_file,
            target_table: table_name,
            status,
            rows_read: outcome.total_rows,
            rows_inserted: outcome.successful_rows,
            rows_failed: outcome.failed_rows,
            attempts: 1,
            relocated_to: Some(outcome.final_path),
            report: outcome.report,
            error: outcome.reason,
        })
    }

    /// Terminal failure before any row was read: move to `error/` and record it.
    #[allow(clippy::too_many_arguments)]
    async fn reject_file(
        &self,
        path: &Path,
        dirs: &LoadDirs,
        table_name: &str,
        job_run_id: Uuid,
        start: DateTime<Utc>,
        batch_job_id: Option<Uuid>,
        err: LoadError,
    ) -> Result<FileSummary> {
        error!("{}", err);
        let final_path = dirs.relocate(path, Destination::Error).await?;

        let end = Utc::now();
        let stats = JobStatistics {
            job_run_id,
            start_time: start,
            end_time: end,
            duration_seconds: (end - start).num_seconds(),
            status: JobStatus::Failed,
            source_file: path_string(path),
            target_table: table_name.to_string(),
            rows_read: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_failed: 0,
            error_message: Some(err.to_string()),
            batch_job_id,
        };
        self.write_statistics(&stats).await;
        self.write_error(job_run_id, table_name, None, &err).await;

        Ok(FileSummary {
            job_run_id,
            source_file: stats.source_file,
            target_table: stats.target_table,
            status: JobStatus::Failed,
            rows_read: 0,
            rows_inserted: 0,
            rows_failed: 0,
            attempts: 1,
            relocated_to: Some(final_path),
            report: None,
            error: stats.error_message,
        })
    }

    /// Statistics are best effort: a failed write is logged, not propagated.
    async fn write_statistics(&self, stats: &JobStatistics) {
        if let Err(e) = self.stats.write_job_statistics(stats).await {
            error!(
                "Failed to write job statistics for {}: {}",
                stats.source_file, e
            );
        }
    }

    async fn write_error(
        &self,
        job_run_id: Uuid,
        table_name: &str,
        column_name: Option<String>,
        err: &LoadError,
    ) {
        let Some(backend) = &self.error_log else {
            return;
        };
        let entry = ErrorLogEntry {
            job_run_id,
            table_name: table_name.to_string(),
            column_name,
            error_type: err.kind().to_string(),
            error_message: err.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = backend.write_error_log(&entry).await {
            error!("Failed to write to error log: {}", e);
        }
    }
}

/// Regular files of `dir`, sorted by name, as full path strings.
async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name());
        }
    }
    names.sort();
    Ok(names
        .into_iter()
        .map(|name| path_string(&dir.join(name)))
        .collect())
}
