//! JSON state file backend.
//!
//! The whole document is rewritten after every change.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LoadError, Result};
use crate::state::backend::StatsBackend;
use crate::state::{
    BatchJobRecord, BatchStatus, ErrorLogEntry, FileOutcome, JobStatistics, StatsFile,
};

pub struct FileStatsBackend {
    path: PathBuf,
    state: Mutex<StatsFile>,
}

impl FileStatsBackend {
    /// Open `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = StatsFile::load_or_default(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StatsFile>> {
        self.state
            .lock()
            .map_err(|_| LoadError::State("state file lock poisoned".to_string()))
    }

    /// Apply `f` and persist the document.
    fn update<T>(&self, f: impl FnOnce(&mut StatsFile) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let result = f(&mut state)?;
        state.save(&self.path)?;
        Ok(result)
    }
}

#[async_trait]
impl StatsBackend for FileStatsBackend {
    async fn init_schema(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.update(|_| Ok(()))?;
        debug!("Using state file {}", self.path.display());
        Ok(())
    }

    async fn write_job_statistics(&self, stats: &JobStatistics) -> Result<()> {
        self.update(|state| {
            state.jobs.push(stats.clone());
            Ok(())
        })
    }

    async fn write_error_log(&self, entry: &ErrorLogEntry) -> Result<()> {
        self.update(|state| {
            state.errors.push(entry.clone());
            Ok(())
        })
    }

    async fn find_resumable_batch(
        &self,
        directory: &str,
        max_age_hours: u32,
    ) -> Result<Option<BatchJobRecord>> {
        let cutoff = Utc::now() - Duration::hours(i64::from(max_age_hours));
        let state = self.lock()?;
        Ok(state
            .batches
            .iter()
            .filter(|b| {
                b.directory_path == directory && b.status.is_resumable() && b.start_time > cutoff
            })
            .max_by_key(|b| b.start_time)
            .cloned())
    }

    async fn insert_batch(&self, batch: &BatchJobRecord) -> Result<()> {
        self.update(|state| {
            state.batches.push(batch.clone());
            Ok(())
        })
    }

    async fn mark_resumed(&self, batch_job_id: Uuid) -> Result<()> {
        self.update(|state| {
            let batch = state
                .batch_mut(batch_job_id)
                .ok_or_else(|| LoadError::State(format!("Unknown batch {}", batch_job_id)))?;
            batch.status = BatchStatus::InProgress;
            batch.is_resumed = true;
            Ok(())
        })
    }

    async fn update_batch(&self, batch: &BatchJobRecord) -> Result<()> {
        self.update(|state| {
            let stored = state.batch_mut(batch.batch_job_id).ok_or_else(|| {
                LoadError::State(format!("Unknown batch {}", batch.batch_job_id))
            })?;
            stored.total_files = batch.total_files;
            stored.files_processed = batch.files_processed;
            stored.files_failed = batch.files_failed;
            stored.end_time = batch.end_time;
            stored.status = batch.status;
            Ok(())
        })
    }

    async fn file_outcomes(&self, batch_job_id: Uuid) -> Result<Vec<FileOutcome>> {
        let state = self.lock()?;
        let mut jobs: Vec<&JobStatistics> = state
            .jobs
            .iter()
            .filter(|j| j.batch_job_id == Some(batch_job_id))
            .collect();
        jobs.sort_by_key(|j| j.end_time);
        Ok(jobs
            .into_iter()
            .map(|j| FileOutcome {
                source_file: j.source_file.clone(),
                status: j.status,
            })
            .collect())
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobStatus;

    #[tokio::test]
    async fn test_batch_lifecycle_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/loader.json");
        let backend = FileStatsBackend::open(&path).unwrap();
        backend.init_schema().await.unwrap();
        assert!(path.exists());

        let batch = BatchJobRecord::new("/in", 2);
        backend.insert_batch(&batch).await.unwrap();

        let found = backend.find_resumable_batch("/in", 24).await.unwrap();
        assert_eq!(found.unwrap().batch_job_id, batch.batch_job_id);
        assert!(backend
            .find_resumable_batch("/other", 24)
            .await
            .unwrap()
            .is_none());

        let mut done = batch.clone();
        done.status = BatchStatus::Completed;
        done.files_processed = 2;
        backend.update_batch(&done).await.unwrap();
        assert!(backend.find_resumable_batch("/in", 24).await.unwrap().is_none());

        let reopened = FileStatsBackend::open(&path).unwrap();
        let state = reopened.lock().unwrap();
        assert_eq!(state.batches[0].status, BatchStatus::Completed);
        assert_eq!(state.batches[0].files_processed, 2);
    }

    #[tokio::test]
    async fn test_old_batches_are_not_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStatsBackend::open(dir.path().join("s.json")).unwrap();
        let mut batch = BatchJobRecord::new("/in", 2);
        batch.start_time = Utc::now() - Duration::hours(30);
        backend.insert_batch(&batch).await.unwrap();

        assert!(backend.find_resumable_batch("/in", 24).await.unwrap().is_none());
        assert!(backend.find_resumable_batch("/in", 48).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_outcomes_filtered_by_batch() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStatsBackend::open(dir.path().join("s.json")).unwrap();
        let batch_id = Uuid::new_v4();

        let mut ok = JobStatistics::failed("/in/a.csv", "a", "x", Some(batch_id));
        ok.status = JobStatus::Completed;
        ok.error_message = None;
        backend.write_job_statistics(&ok).await.unwrap();
        backend
            .write_job_statistics(&JobStatistics::failed("/in/b.csv", "b", "x", None))
            .await
            .unwrap();

        let outcomes = backend.file_outcomes(batch_id).await.unwrap();
        assert_eq!(
            outcomes,
            vec![FileOutcome {
                source_file: "/in/a.csv".into(),
                status: JobStatus::Completed,
            }]
        );
    }

    #[tokio::test]
    async fn test_mark_resumed_unknown_batch() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStatsBackend::open(dir.path().join("s.json")).unwrap();
        assert!(matches!(
            backend.mark_resumed(Uuid::new_v4()).await,
            Err(LoadError::State(_))
        ));
    }
}
