//! Statistics backend trait.
//!
//! The orchestrator and the batch checkpoint manager work with
//! `Arc<dyn StatsBackend>` without knowing where records end up:
//!
//! - **MSSQL**: `MssqlStatsBackend` in `mssql_db.rs`
//! - **File**: `FileStatsBackend` in `file.rs`
//! - **None**: `NoOpStatsBackend` in `noop.rs`

use async_trait::async_trait;
use uuid::Uuid;

use super::{BatchJobRecord, ErrorLogEntry, FileOutcome, JobStatistics};
use crate::error::Result;

/// Persistence for job statistics, error log rows and batch records.
///
/// Implementations must be `Send + Sync`.
#[async_trait]
pub trait StatsBackend: Send + Sync {
    /// Create tables or files as needed. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Record one file attempt.
    async fn write_job_statistics(&self, stats: &JobStatistics) -> Result<()>;

    /// Record one error log row.
    async fn write_error_log(&self, entry: &ErrorLogEntry) -> Result<()>;

    /// Latest `InProgress` or `Failed` batch for `directory` started within
    /// the last `max_age_hours`.
    async fn find_resumable_batch(
        &self,
        directory: &str,
        max_age_hours: u32,
    ) -> Result<Option<BatchJobRecord>>;

    /// Insert a new batch record.
    async fn insert_batch(&self, batch: &BatchJobRecord) -> Result<()>;

    /// Set a batch back to `InProgress` and flag it as resumed.
    async fn mark_resumed(&self, batch_job_id: Uuid) -> Result<()>;

    /// Overwrite the counts, status and end time of a batch.
    async fn update_batch(&self, batch: &BatchJobRecord) -> Result<()>;

    /// Recorded file outcomes of a batch, oldest first.
    async fn file_outcomes(&self, batch_job_id: Uuid) -> Result<Vec<FileOutcome>>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}
