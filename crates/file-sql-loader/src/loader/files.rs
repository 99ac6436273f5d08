//! Relocation of loaded files and failure reports.

use crate::error::Result;
use serde_json::Value;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

const PROCESSED_DIR: &str = "processed";
const ERROR_DIR: &str = "error";
const LOGS_DIR: &str = "logs";

/// Where a file ends up after its load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Processed,
    Error,
}

impl Destination {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Destination::Processed => PROCESSED_DIR,
            Destination::Error => ERROR_DIR,
        }
    }
}

/// The `processed`, `error` and `logs` directories beside a source file.
#[derive(Debug, Clone)]
pub struct LoadDirs {
    processed: PathBuf,
    error: PathBuf,
    logs: PathBuf,
}

impl LoadDirs {
    /// Sibling directories for files living in `parent`.
    pub fn for_parent(parent: &Path) -> Self {
        Self {
            processed: parent.join(PROCESSED_DIR),
            error: parent.join(ERROR_DIR),
            logs: parent.join(LOGS_DIR),
        }
    }

    /// Sibling directories for `file`.
    pub fn for_file(file: &Path) -> Self {
        let parent = match file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        Self::for_parent(parent)
    }

    /// Create all three directories if absent.
    pub async fn ensure(&self) -> Result<()> {
        for dir in [&self.processed, &self.error, &self.logs] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn dir(&self, destination: Destination) -> &Path {
        match destination {
            Destination::Processed => &self.processed,
            Destination::Error => &self.error,
        }
    }

    /// Move `file` into `destination` under its own name.
    pub async fn relocate(&self, file: &Path, destination: Destination) -> Result<PathBuf> {
        let name = file.file_name().unwrap_or(file.as_os_str());
        let target = self.dir(destination).join(name);
        tokio::fs::rename(file, &target).await?;
        info!("Moved {} to {}", file.display(), target.display());
        Ok(target)
    }

    /// `logs/{stem}_{job_run_id}.txt` for `file`.
    pub fn report_path(&self, file: &Path, job_run_id: Uuid) -> PathBuf {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.logs.join(format!("{}_{}.txt", stem, job_run_id))
    }
}

/// One row that did not make it into the table.
#[derive(Debug, Clone)]
pub struct FailedRow {
    /// 1-based data row number in file order.
    pub row: usize,
    pub data: Value,
    pub error: String,
}

/// Render the tolerant-mode failure report: one line per failed row.
pub fn render_failure_report(rows: &[FailedRow]) -> String {
    let mut out = String::new();
    for failed in rows {
        let _ = writeln!(out, "Row {}: {} - {}", failed.row, failed.data, failed.error);
    }
    out
}

/// Render the strict-mode validation report.
pub fn render_validation_report(file_name: &str, rows: &[FailedRow]) -> String {
    let mut out = format!(
        "Validation errors for file: {}\nTotal errors: {}\n\n",
        file_name,
        rows.len()
    );
    for failed in rows {
        let _ = write!(
            out,
            "Row {}: {}\nData: {}\n\n",
            failed.row, failed.error, failed.data
        );
    }
    out
}

pub async fn write_report(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents).await?;
    debug!("Wrote report {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ensure_and_relocate() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("orders_001.csv");
        tokio::fs::write(&file, "id\n1\n").await.unwrap();

        let dirs = LoadDirs::for_file(&file);
        dirs.ensure().await.unwrap();
        assert!(dir.path().join("processed").is_dir());
        assert!(dir.path().join("error").is_dir());
        assert!(dir.path().join("logs").is_dir());

        let moved = dirs.relocate(&file, Destination::Error).await.unwrap();
        assert_eq!(moved, dir.path().join("error").join("orders_001.csv"));
        assert!(!file.exists());
        assert!(moved.exists());
    }

    #[test]
    fn test_report_path_uses_stem_and_run_id() {
        let dirs = LoadDirs::for_parent(Path::new("/data/in"));
        let id = Uuid::nil();
        assert_eq!(
            dirs.report_path(Path::new("/data/in/orders.csv"), id),
            PathBuf::from(format!("/data/in/logs/orders_{}.txt", id))
        );
    }

    #[test]
    fn test_report_rendering() {
        let rows = vec![FailedRow {
            row: 2,
            data: json!({"id": "x"}),
            error: "bad id".into(),
        }];
        assert_eq!(
            render_failure_report(&rows),
            "Row 2: {\"id\":\"x\"} - bad id\n"
        );
        let strict = render_validation_report("orders.csv", &rows);
        assert!(strict.starts_with("Validation errors for file: orders.csv\nTotal errors: 1\n\n"));
        assert!(strict.contains("Row 2: bad id\nData: {\"id\":\"x\"}\n"));
    }
}
