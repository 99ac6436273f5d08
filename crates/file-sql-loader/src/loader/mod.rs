//! Strict and tolerant loading of one dataset into its table.
//!
//! A load moves through `Validating → Inserting → Committed | RolledBack`,
//! or stops early at `Rejected` when strict pre-validation fails. The
//! source file is relocated to `processed/` on commit and to `error/`
//! otherwise. Database errors that are not a refusal of the data itself
//! are returned as `Err` and leave the file in place for a retry, unless
//! the engine runs the final attempt: then the file is rolled back and
//! moved to `error/`. Once a transaction has committed the outcome is
//! `Committed`, even if the move or the report fails afterwards.

pub mod convert;
pub mod files;

pub use files::{Destination, FailedRow, LoadDirs};

use crate::config::TransactionMode;
use crate::core::Row;
use crate::dataset::Dataset;
use crate::error::{LoadError, Result, RowConversionError};
use crate::schema::SchemaPlan;
use crate::target::{BatchInsert, LoadTransaction, RowInsert, TargetDb};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rows between progress log lines in tolerant mode.
const PROGRESS_INTERVAL: usize = 1000;

/// Terminal state of a file load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadState {
    Committed,
    RolledBack,
    Rejected,
}

/// Result of one load attempt.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub state: LoadState,
    pub total_rows: usize,
    pub successful_rows: usize,
    pub failed_rows: usize,
    pub destination: Destination,
    /// Where the source file now lives.
    pub final_path: PathBuf,
    pub report: Option<PathBuf>,
    /// Why the file was not committed.
    pub reason: Option<String>,
    /// Per-column conversion failures found by strict pre-validation,
    /// keyed by 1-based row number.
    pub conversion_errors: Vec<(usize, RowConversionError)>,
}

impl LoadOutcome {
    pub fn rejected(&self) -> bool {
        self.state != LoadState::Committed
    }
}

/// Inserts a dataset under the configured [`TransactionMode`].
pub struct LoadEngine<'a> {
    target: &'a dyn TargetDb,
    mode: TransactionMode,
    max_row_errors: usize,
    final_attempt: bool,
}

impl<'a> LoadEngine<'a> {
    pub fn new(target: &'a dyn TargetDb, mode: TransactionMode, max_row_errors: usize) -> Self {
        Self {
            target,
            mode,
            max_row_errors,
            final_attempt: false,
        }
    }

    /// No retry follows this load: insert errors settle the file in `error/`.
    pub fn final_attempt(mut self, final_attempt: bool) -> Self {
        self.final_attempt = final_attempt;
        self
    }

    /// Load every row of `dataset` into `plan.table_name`, then relocate
    /// the source file. `dirs` must already exist.
    pub async fn load(
        &self,
        dataset: &Dataset,
        plan: &SchemaPlan,
        dirs: &LoadDirs,
        job_run_id: Uuid,
    ) -> Result<LoadOutcome> {
        let start = Instant::now();
        info!(
            "Loading {} rows from {} into {} ({:?} mode)",
            dataset.row_count(),
            dataset.source().display(),
            plan.table_name,
            self.mode
        );

        let outcome = match self.mode {
            TransactionMode::Strict => self.load_strict(dataset, plan, dirs, job_run_id).await?,
            TransactionMode::Tolerant => {
                self.load_tolerant(dataset, plan, dirs, job_run_id).await?
            }
        };

        info!(
            "{}: {:?}, {} of {} rows loaded, {} failed in {:.2}s",
            plan.table_name,
            outcome.state,
            outcome.successful_rows,
            outcome.total_rows,
            outcome.failed_rows,
            start.elapsed().as_secs_f64()
        );
        Ok(outcome)
    }

    async fn load_strict(
        &self,
        dataset: &Dataset,
        plan: &SchemaPlan,
        dirs: &LoadDirs,
        job_run_id: Uuid,
    ) -> Result<LoadOutcome> {
        let total = dataset.row_count();
        let mut rows: Vec<Row> = Vec::with_capacity(total);
        let mut failed: Vec<FailedRow> = Vec::new();
        let mut conversion_errors = Vec::new();

        for i in 0..total {
            match convert::validate_row(&dataset.row(i), &plan.columns) {
                Ok(row) => rows.push(row),
                Err(errors) => {
                    let message = errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; ");
                    failed.push(FailedRow {
                        row: i + 1,
                        data: dataset.row_json(i),
                        error: message,
                    });
                    conversion_errors.extend(errors.into_iter().map(|e| (i + 1, e)));
                }
            }
        }

        if !failed.is_empty() {
            let file_name = file_name(dataset);
            warn!(
                "Pre-validation failed for {} of {} rows in {}",
                failed.len(),
                total,
                file_name
            );
            let report = dirs.report_path(dataset.source(), job_run_id);
            files::write_report(&report, &files::render_validation_report(&file_name, &failed))
                .await?;
            let reason = LoadError::Validation {
                file: file_name,
                failed: failed.len(),
            }
            .to_string();

            let mut outcome = self
                .finish_unloaded(dataset, dirs, LoadState::Rejected, reason)
                .await?;
            outcome.report = Some(report);
            outcome.conversion_errors = conversion_errors;
            return Ok(outcome);
        }

        debug!("All {} rows of {} validated", total, plan.table_name);

        let mut tx = self.target.begin_load(plan).await?;
        match tx.insert_batch(&rows).await {
            Ok(BatchInsert::Inserted(n)) => {
                tx.commit().await?;
                debug!("Committed {} rows into {}", n, plan.table_name);
                let (final_path, _) = settle_committed(dataset, dirs, job_run_id, &[]).await;
                Ok(LoadOutcome {
                    state: LoadState::Committed,
                    total_rows: total,
                    successful_rows: total,
                    failed_rows: 0,
                    destination: Destination::Processed,
                    final_path,
                    report: None,
                    reason: None,
                    conversion_errors: Vec::new(),
                })
            }
            Ok(BatchInsert::Rejected(message)) => {
                warn!("Batch insert into {} refused: {}", plan.table_name, message);
                tx.rollback().await?;
                self.finish_unloaded(dataset, dirs, LoadState::RolledBack, message)
                    .await
            }
            Err(e) => {
                rollback_quietly(tx, &plan.table_name).await;
                self.insert_failed(dataset, dirs, e).await
            }
        }
    }

    async fn load_tolerant(
        &self,
        dataset: &Dataset,
        plan: &SchemaPlan,
        dirs: &LoadDirs,
        job_run_id: Uuid,
    ) -> Result<LoadOutcome> {
        let total = dataset.row_count();
        let mut tx = self.target.begin_load(plan).await?;
        let mut successful = 0usize;
        let mut failed: Vec<FailedRow> = Vec::new();
        let mut aborted: Option<String> = None;

        for i in 0..total {
            let row = convert::convert_row(&dataset.row(i), &plan.columns);
            let result = match tx.insert_row(&row).await {
                Ok(result) => result,
                Err(e) => {
                    rollback_quietly(tx, &plan.table_name).await;
                    return self.insert_failed(dataset, dirs, e).await;
                }
            };

            match result {
                RowInsert::Inserted => successful += 1,
                RowInsert::Rejected(error) => {
                    debug!("Row {} of {} refused: {}", i + 1, plan.table_name, error);
                    failed.push(FailedRow {
                        row: i + 1,
                        data: dataset.row_json(i),
                        error,
                    });
                    if failed.len() > self.max_row_errors {
                        break;
                    }
                }
                RowInsert::Aborted(error) => {
                    warn!(
                        "Row {} aborted the transaction on {}: {}",
                        i + 1,
                        plan.table_name,
                        error
                    );
                    failed.push(FailedRow {
                        row: i + 1,
                        data: dataset.row_json(i),
                        error: error.clone(),
                    });
                    aborted = Some(error);
                    break;
                }
            }

            if (i + 1) % PROGRESS_INTERVAL == 0 {
                debug!(
                    "{}: {} rows processed ({} failed)",
                    plan.table_name,
                    i + 1,
                    failed.len()
                );
            }
        }

        if failed.len() > self.max_row_errors {
            let reason = LoadError::ThresholdExceeded {
                file: file_name(dataset),
                failed: failed.len(),
                threshold: self.max_row_errors,
            }
            .to_string();
            warn!("{}", reason);
            tx.rollback().await?;
            return self
                .finish_unloaded(dataset, dirs, LoadState::RolledBack, reason)
                .await;
        }

        if let Some(reason) = aborted {
            tx.rollback().await?;
            return self
                .finish_unloaded(dataset, dirs, LoadState::RolledBack, reason)
                .await;
        }

        tx.commit().await?;
        let (final_path, report) = settle_committed(dataset, dirs, job_run_id, &failed).await;

        Ok(LoadOutcome {
            state: LoadState::Committed,
            total_rows: total,
            successful_rows: successful,
            failed_rows: failed.len(),
            destination: Destination::Processed,
            final_path,
            report,
            reason: None,
            conversion_errors: Vec::new(),
        })
    }

    /// An insert raised an error and the transaction was rolled back.
    async fn insert_failed(
        &self,
        dataset: &Dataset,
        dirs: &LoadDirs,
        err: LoadError,
    ) -> Result<LoadOutcome> {
        if !self.final_attempt {
            return Err(err);
        }
        error!(
            "Loading {} failed on the final attempt: {}",
            dataset.source().display(),
            err
        );
        self.finish_unloaded(dataset, dirs, LoadState::RolledBack, err.to_string())
            .await
    }

    /// Move the file to `error/` and report every row as failed.
    async fn finish_unloaded(
        &self,
        dataset: &Dataset,
        dirs: &LoadDirs,
        state: LoadState,
        reason: String,
    ) -> Result<LoadOutcome> {
        let final_path = dirs.relocate(dataset.source(), Destination::Error).await?;
        Ok(LoadOutcome {
            state,
            total_rows: dataset.row_count(),
            successful_rows: 0,
            failed_rows: dataset.row_count(),
            destination: Destination::Error,
            final_path,
            report: None,
            reason: Some(reason),
            conversion_errors: Vec::new(),
        })
    }
}

/// Relocate a committed file to `processed/` and write its failure report,
/// if any rows failed. The rows are already durable, so both steps only log
/// their errors. Returns where the file now lives and the report path.
async fn settle_committed(
    dataset: &Dataset,
    dirs: &LoadDirs,
    job_run_id: Uuid,
    failed: &[FailedRow],
) -> (PathBuf, Option<PathBuf>) {
    let report = if failed.is_empty() {
        None
    } else {
        let path = dirs.report_path(dataset.source(), job_run_id);
        match files::write_report(&path, &files::render_failure_report(failed)).await {
            Ok(()) => {
                warn!(
                    "{} rows of {} failed, see {}",
                    failed.len(),
                    file_name(dataset),
                    path.display()
                );
                Some(path)
            }
            Err(e) => {
                error!(
                    "{} rows of {} failed but the report {} could not be written: {}",
                    failed.len(),
                    file_name(dataset),
                    path.display(),
                    e
                );
                None
            }
        }
    };

    let final_path = match dirs.relocate(dataset.source(), Destination::Processed).await {
        Ok(path) => path,
        Err(e) => {
            error!(
                "Rows of {} are committed but the file could not be moved to {}: {}",
                dataset.source().display(),
                Destination::Processed.dir_name(),
                e
            );
            dataset.source().to_path_buf()
        }
    };

    (final_path, report)
}

async fn rollback_quietly(tx: Box<dyn LoadTransaction>, table: &str) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback of {} failed: {}", table, e);
    }
}

fn file_name(dataset: &Dataset) -> String {
    dataset
        .source()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
