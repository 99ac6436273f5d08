//! Job statistics, error log rows and batch checkpoint records.
//!
//! Records are written through a [`StatsBackend`]: SQL Server tables,
//! a JSON state file ([`StatsFile`]), or nowhere at all.

pub mod backend;
pub mod file;
pub mod mssql_db;
pub mod noop;

pub use backend::StatsBackend;
pub use file::FileStatsBackend;
pub use mssql_db::MssqlStatsBackend;
pub use noop::NoOpStatsBackend;

use crate::error::{LoadError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Final status of one file attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Completed" => Ok(JobStatus::Completed),
            "Failed" => Ok(JobStatus::Failed),
            _ => Err(LoadError::State(format!("Invalid job status: {}", s))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a directory batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    InProgress,
    Failed,
    Completed,
    CompletedWithErrors,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::InProgress => "InProgress",
            BatchStatus::Failed => "Failed",
            BatchStatus::Completed => "Completed",
            BatchStatus::CompletedWithErrors => "CompletedWithErrors",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "InProgress" => Ok(BatchStatus::InProgress),
            "Failed" => Ok(BatchStatus::Failed),
            "Completed" => Ok(BatchStatus::Completed),
            "CompletedWithErrors" => Ok(BatchStatus::CompletedWithErrors),
            _ => Err(LoadError::State(format!("Invalid batch status: {}", s))),
        }
    }

    /// Batches that stopped before finishing and may be picked up again.
    pub fn is_resumable(&self) -> bool {
        matches!(self, BatchStatus::InProgress | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the job statistics table: one per file attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub job_run_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub status: JobStatus,
    pub source_file: String,
    pub target_table: String,
    pub rows_read: i64,
    pub rows_inserted: i64,
    pub rows_updated: i64,
    pub rows_failed: i64,
    pub error_message: Option<String>,
    pub batch_job_id: Option<Uuid>,
}

impl JobStatistics {
    /// A zero-row failure record for a file that never reached a load outcome.
    pub fn failed(
        source_file: impl Into<String>,
        target_table: impl Into<String>,
        error_message: impl Into<String>,
        batch_job_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_run_id: Uuid::new_v4(),
            start_time: now,
            end_time: now,
            duration_seconds: 0,
            status: JobStatus::Failed,
            source_file: source_file.into(),
            target_table: target_table.into(),
            rows_read: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_failed: 0,
            error_message: Some(error_message.into()),
            batch_job_id,
        }
    }
}

/// One row of the error log table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub job_run_id: Uuid,
    pub table_name: String,
    pub column_name: Option<String>,
    pub error_type: String,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
}

/// One row of the batch statistics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJobRecord {
    pub batch_job_id: Uuid,
    pub directory_path: String,
    pub total_files: i64,
    pub files_processed: i64,
    pub files_failed: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub is_resumed: bool,
}

impl BatchJobRecord {
    /// A fresh `InProgress` batch.
    pub fn new(directory_path: impl Into<String>, total_files: i64) -> Self {
        Self {
            batch_job_id: Uuid::new_v4(),
            directory_path: directory_path.into(),
            total_files,
            files_processed: 0,
            files_failed: 0,
            start_time: Utc::now(),
            end_time: None,
            status: BatchStatus::InProgress,
            is_resumed: false,
        }
    }

    /// Files with no recorded outcome yet.
    pub fn remaining_files(&self) -> i64 {
        self.total_files - self.files_processed - self.files_failed
    }
}

/// Latest known status of one file within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub source_file: String,
    pub status: JobStatus,
}

/// Contents of the JSON state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsFile {
    #[serde(default)]
    pub jobs: Vec<JobStatistics>,
    #[serde(default)]
    pub errors: Vec<ErrorLogEntry>,
    #[serde(default)]
    pub batches: Vec<BatchJobRecord>,
}

impl StatsFile {
    /// Load the state file, or start empty if it does not exist yet.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)
            .map_err(|e| LoadError::State(format!("Invalid state file {}: {}", path.display(), e)))?;
        Ok(state)
    }

    /// Save the state file (atomic write).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    pub fn batch_mut(&mut self, batch_job_id: Uuid) -> Option<&mut BatchJobRecord> {
        self.batches
            .iter_mut()
            .find(|b| b.batch_job_id == batch_job_id)
    }
}
