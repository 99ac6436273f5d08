//! No-op statistics backend used when job statistics are disabled.
//!
//! Nothing is recorded, so batches never resume.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::state::backend::StatsBackend;
use crate::state::{BatchJobRecord, ErrorLogEntry, FileOutcome, JobStatistics};

pub struct NoOpStatsBackend {
    warned: AtomicBool,
}

impl NoOpStatsBackend {
    pub fn new() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            warn!(
                "Job statistics are disabled: batch progress will not be recorded \
                 and interrupted batches cannot be resumed."
            );
        }
    }
}

impl Default for NoOpStatsBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsBackend for NoOpStatsBackend {
    async fn init_schema(&self) -> Result<()> {
        self.warn_once();
        Ok(())
    }

    async fn write_job_statistics(&self, _stats: &JobStatistics) -> Result<()> {
        Ok(())
    }

    async fn write_error_log(&self, _entry: &ErrorLogEntry) -> Result<()> {
        Ok(())
    }

    async fn find_resumable_batch(
        &self,
        _directory: &str,
        _max_age_hours: u32,
    ) -> Result<Option<BatchJobRecord>> {
        Ok(None)
    }

    async fn insert_batch(&self, _batch: &BatchJobRecord) -> Result<()> {
        Ok(())
    }

    async fn mark_resumed(&self, _batch_job_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn update_batch(&self, _batch: &BatchJobRecord) -> Result<()> {
        Ok(())
    }

    async fn file_outcomes(&self, _batch_job_id: Uuid) -> Result<Vec<FileOutcome>> {
        Ok(Vec::new())
    }

    fn backend_type(&self) -> &'static str {
        "noop"
    }
}
