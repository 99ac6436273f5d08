//! Batch checkpointing: resume an interrupted directory run without
//! reloading files that already completed.
//!
//! Counts are always derived from the latest recorded outcome of each
//! file and written back after every file, so an interruption at any
//! point leaves a batch record that matches the job statistics.

use crate::config::BatchConfig;
use crate::error::Result;
use crate::state::{BatchJobRecord, BatchStatus, JobStatus, StatsBackend};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct BatchCheckpointManager {
    backend: Arc<dyn StatsBackend>,
    record: BatchJobRecord,
    /// Latest outcome per source file.
    outcomes: BTreeMap<String, JobStatus>,
}

impl BatchCheckpointManager {
    /// Resume the latest unfinished batch for `directory`, or start a new one.
    ///
    /// `all_files` is the current listing of the directory.
    pub async fn start(
        backend: Arc<dyn StatsBackend>,
        settings: &BatchConfig,
        directory: &str,
        all_files: &[String],
    ) -> Result<Self> {
        if settings.enable_checkpointing && settings.resume_incomplete_batches {
            let candidate = backend
                .find_resumable_batch(directory, settings.max_resume_age_hours)
                .await?;
            match candidate {
                Some(record) if record.remaining_files() > 0 => {
                    return Self::resume(backend, record, all_files).await;
                }
                Some(record) => {
                    info!(
                        "Batch {} has no remaining files, starting a new batch",
                        record.batch_job_id
                    );
                }
                None => {}
            }
        }

        let record = BatchJobRecord::new(directory, all_files.len() as i64);
        backend.insert_batch(&record).await?;
        info!(
            "Starting new batch {} for {} ({} files)",
            record.batch_job_id, directory, record.total_files
        );

        Ok(Self {
            backend,
            record,
            outcomes: BTreeMap::new(),
        })
    }

    async fn resume(
        backend: Arc<dyn StatsBackend>,
        mut record: BatchJobRecord,
        all_files: &[String],
    ) -> Result<Self> {
        backend.mark_resumed(record.batch_job_id).await?;
        record.status = BatchStatus::InProgress;
        record.is_resumed = true;

        let mut outcomes = BTreeMap::new();
        for outcome in backend.file_outcomes(record.batch_job_id).await? {
            outcomes.insert(outcome.source_file, outcome.status);
        }

        let mut manager = Self {
            backend,
            record,
            outcomes,
        };

        let known: BTreeSet<&str> = all_files
            .iter()
            .map(String::as_str)
            .chain(manager.outcomes.keys().map(String::as_str))
            .collect();
        let known = known.len() as i64;
        if known > manager.record.total_files {
            info!(
                "{} new files appeared since batch {} started",
                known - manager.record.total_files,
                manager.record.batch_job_id
            );
            manager.record.total_files = known;
        }
        manager.recount();
        manager.backend.update_batch(&manager.record).await?;

        info!(
            "Resuming batch {}: {} files already processed, {} failed",
            manager.record.batch_job_id,
            manager.record.files_processed,
            manager.record.files_failed
        );
        Ok(manager)
    }

    pub fn batch_job_id(&self) -> Uuid {
        self.record.batch_job_id
    }

    pub fn is_resumed(&self) -> bool {
        self.record.is_resumed
    }

    pub fn record(&self) -> &BatchJobRecord {
        &self.record
    }

    /// Files of `all_files` without a recorded `Completed` outcome, in order.
    pub fn pending_files<'a>(&self, all_files: &'a [String]) -> Vec<&'a String> {
        all_files
            .iter()
            .filter(|f| self.outcomes.get(f.as_str()) != Some(&JobStatus::Completed))
            .collect()
    }

    /// Record the final outcome of one file and persist the new counts.
    pub async fn record_outcome(&mut self, file: &str, status: JobStatus) -> Result<()> {
        self.outcomes.insert(file.to_string(), status);
        if self.outcomes.len() as i64 > self.record.total_files {
            self.record.total_files = self.outcomes.len() as i64;
        }
        self.recount();
        self.backend.update_batch(&self.record).await
    }

    /// Close the batch as `Completed` or `CompletedWithErrors`.
    pub async fn finish(&mut self) -> Result<BatchStatus> {
        self.record.status = if self.record.files_failed > 0 {
            BatchStatus::CompletedWithErrors
        } else {
            BatchStatus::Completed
        };
        self.record.end_time = Some(Utc::now());
        self.backend.update_batch(&self.record).await?;
        info!(
            "Batch {} finished: {} ({} processed, {} failed of {})",
            self.record.batch_job_id,
            self.record.status,
            self.record.files_processed,
            self.record.files_failed,
            self.record.total_files
        );
        Ok(self.record.status)
    }

    /// Mark the batch `Failed` after the run stopped early. Best effort.
    pub async fn abandon(&mut self) {
        self.record.status = BatchStatus::Failed;
        self.record.end_time = Some(Utc::now());
        if let Err(e) = self.backend.update_batch(&self.record).await {
            warn!(
                "Could not mark batch {} as failed: {}",
                self.record.batch_job_id, e
            );
        }
    }

    fn recount(&mut self) {
        let processed = self
            .outcomes
            .values()
            .filter(|s| **s == JobStatus::Completed)
            .count();
        self.record.files_processed = processed as i64;
        self.record.files_failed = (self.outcomes.len() - processed) as i64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FileStatsBackend, JobStatistics, NoOpStatsBackend};

    fn settings() -> BatchConfig {
        BatchConfig {
            enable_checkpointing: true,
            resume_incomplete_batches: true,
            max_resume_age_hours: 24,
        }
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("/in/{}", n)).collect()
    }

    async fn completed(backend: &FileStatsBackend, file: &str, batch: Uuid) {
        let mut stats = JobStatistics::failed(file, "t", "", Some(batch));
        stats.status = JobStatus::Completed;
        stats.error_message = None;
        backend.write_job_statistics(&stats).await.unwrap();
    }

    #[tokio::test]
    async fn test_new_batch_when_nothing_to_resume() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileStatsBackend::open(dir.path().join("s.json")).unwrap());
        let all = files(&["a.csv", "b.csv"]);

        let manager = BatchCheckpointManager::start(backend.clone(), &settings(), "/in", &all)
            .await
            .unwrap();
        assert!(!manager.is_resumed());
        assert_eq!(manager.record().total_files, 2);
        assert_eq!(manager.pending_files(&all).len(), 2);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileStatsBackend::open(dir.path().join("s.json")).unwrap());
        let all = files(&["a.csv", "b.csv", "c.csv"]);

        let mut first = BatchCheckpointManager::start(backend.clone(), &settings(), "/in", &all)
            .await
            .unwrap();
        let batch_id = first.batch_job_id();
        completed(&backend, "/in/a.csv", batch_id).await;
        first
            .record_outcome("/in/a.csv", JobStatus::Completed)
            .await
            .unwrap();
        // Interrupted here. a.csv was moved to processed/.
        let remaining = files(&["b.csv", "c.csv"]);

        let resumed = BatchCheckpointManager::start(backend.clone(), &settings(), "/in", &remaining)
            .await
            .unwrap();
        assert!(resumed.is_resumed());
        assert_eq!(resumed.batch_job_id(), batch_id);
        assert_eq!(resumed.record().files_processed, 1);
        assert_eq!(resumed.record().total_files, 3);
        assert_eq!(resumed.pending_files(&remaining), vec!["/in/b.csv", "/in/c.csv"]);
    }

    #[tokio::test]
    async fn test_relocated_but_unrecorded_file_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileStatsBackend::open(dir.path().join("s.json")).unwrap());
        let all = files(&["a.csv", "b.csv"]);

        BatchCheckpointManager::start(backend.clone(), &settings(), "/in", &all)
            .await
            .unwrap();

        let resumed = BatchCheckpointManager::start(backend.clone(), &settings(), "/in", &all)
            .await
            .unwrap();
        assert!(resumed.is_resumed());
        assert_eq!(resumed.pending_files(&all).len(), 2);
    }

    #[tokio::test]
    async fn test_new_files_grow_total() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileStatsBackend::open(dir.path().join("s.json")).unwrap());
        let all = files(&["a.csv"]);

        let mut first = BatchCheckpointManager::start(backend.clone(), &settings(), "/in", &all)
            .await
            .unwrap();
        first
            .record_outcome("/in/a.csv", JobStatus::Failed)
            .await
            .unwrap();
        assert_eq!(first.record().remaining_files(), 0);

        // Nothing remains, so the old batch is closed to resumption.
        let second = BatchCheckpointManager::start(
            backend.clone(),
            &settings(),
            "/in",
            &files(&["b.csv", "c.csv"]),
        )
        .await
        .unwrap();
        assert!(!second.is_resumed());

        let mut third = BatchCheckpointManager::start(
            backend.clone(),
            &settings(),
            "/in",
            &files(&["b.csv", "c.csv", "d.csv"]),
        )
        .await
        .unwrap();
        assert!(third.is_resumed());
        assert_eq!(third.batch_job_id(), second.batch_job_id());
        assert_eq!(third.record().total_files, 3);

        third
            .record_outcome("/in/b.csv", JobStatus::Completed)
            .await
            .unwrap();
        let record = third.record();
        assert!(record.files_processed + record.files_failed <= record.total_files);
    }

    #[tokio::test]
    async fn test_finish_status() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileStatsBackend::open(dir.path().join("s.json")).unwrap());
        let all = files(&["a.csv", "b.csv"]);

        let mut manager = BatchCheckpointManager::start(backend.clone(), &settings(), "/in", &all)
            .await
            .unwrap();
        manager
            .record_outcome("/in/a.csv", JobStatus::Completed)
            .await
            .unwrap();
        manager
            .record_outcome("/in/b.csv", JobStatus::Failed)
            .await
            .unwrap();
        assert_eq!(
            manager.finish().await.unwrap(),
            BatchStatus::CompletedWithErrors
        );
        assert!(backend
            .find_resumable_batch("/in", 24)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resume_disabled_always_starts_new() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileStatsBackend::open(dir.path().join("s.json")).unwrap());
        let all = files(&["a.csv"]);
        let mut no_resume = settings();
        no_resume.resume_incomplete_batches = false;

        let first = BatchCheckpointManager::start(backend.clone(), &no_resume, "/in", &all)
            .await
            .unwrap();
        let second = BatchCheckpointManager::start(backend.clone(), &no_resume, "/in", &all)
            .await
            .unwrap();
        assert_ne!(first.batch_job_id(), second.batch_job_id());
    }

    #[tokio::test]
    async fn test_noop_backend_never_resumes() {
        let backend: Arc<dyn StatsBackend> = Arc::new(NoOpStatsBackend::new());
        let all = files(&["a.csv"]);
        let first = BatchCheckpointManager::start(backend.clone(), &settings(), "/in", &all)
            .await
            .unwrap();
        let second = BatchCheckpointManager::start(backend, &settings(), "/in", &all)
            .await
            .unwrap();
        assert!(!second.is_resumed());
        assert_ne!(first.batch_job_id(), second.batch_job_id());
    }
}
