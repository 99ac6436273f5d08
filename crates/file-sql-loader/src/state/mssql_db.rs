//! SQL Server tables for job statistics, error log rows and batches.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tiberius::Row;
use tracing::info;
use uuid::Uuid;

use crate::error::{LoadError, Result};
use crate::schema::qualify;
use crate::state::backend::StatsBackend;
use crate::state::{
    BatchJobRecord, BatchStatus, ErrorLogEntry, FileOutcome, JobStatistics, JobStatus,
};
use crate::target::{MssqlTarget, TargetDb};

/// Names of the statistics tables.
#[derive(Debug, Clone)]
pub struct StatsTables {
    pub job: String,
    pub batch: String,
    pub error: String,
}

/// Statistics stored in the destination database.
pub struct MssqlStatsBackend {
    target: Arc<MssqlTarget>,
    schema: String,
    tables: StatsTables,
}

fn to_utc(value: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(value, Utc)
}

/// Counts are stored in INT columns; out-of-range values saturate.
fn int_column(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

fn missing(column: &str) -> LoadError {
    LoadError::State(format!("Failed to get {} from database", column))
}

impl MssqlStatsBackend {
    pub fn new(target: Arc<MssqlTarget>, tables: StatsTables) -> Self {
        let schema = target.schema().to_string();
        Self {
            target,
            schema,
            tables,
        }
    }

    fn table(&self, name: &str) -> String {
        qualify(&self.schema, name)
    }

    /// `N'[schema].[table]'` for OBJECT_ID lookups.
    fn object_name(&self, name: &str) -> String {
        format!("N'{}'", self.table(name).replace('\'', "''"))
    }

    pub async fn init_schema(&self) -> Result<()> {
        let mut conn = self.target.get_conn().await?;

        let sql = format!(
            "IF OBJECT_ID({obj}, 'U') IS NULL
             BEGIN
                 CREATE TABLE {table} (
                     JobRunID UNIQUEIDENTIFIER PRIMARY KEY,
                     JobStartTime DATETIME2,
                     JobEndTime DATETIME2,
                     JobDurationSeconds INT,
                     JobStatus NVARCHAR(50),
                     SourceFile NVARCHAR(255),
                     TargetTable NVARCHAR(255),
                     RowsRead INT,
                     RowsInserted INT,
                     RowsUpdated INT,
                     RowsFailed INT,
                     ErrorMessage NVARCHAR(MAX),
                     BatchJobID UNIQUEIDENTIFIER NULL
                 )
             END",
            obj = self.object_name(&self.tables.job),
            table = self.table(&self.tables.job)
        );
        conn.execute(sql, &[]).await?;

        // Tables created by older loaders lack the batch reference.
        let sql = format!(
            "IF COL_LENGTH({obj}, 'BatchJobID') IS NULL
                 ALTER TABLE {table} ADD BatchJobID UNIQUEIDENTIFIER NULL",
            obj = self.object_name(&self.tables.job),
            table = self.table(&self.tables.job)
        );
        conn.execute(sql, &[]).await?;

        let sql = format!(
            "IF OBJECT_ID({obj}, 'U') IS NULL
             BEGIN
                 CREATE TABLE {table} (
                     ErrorID INT IDENTITY(1,1) PRIMARY KEY,
                     JobRunID UNIQUEIDENTIFIER,
                     TableName NVARCHAR(255),
                     ColumnName NVARCHAR(255),
                     ErrorType NVARCHAR(100),
                     ErrorMessage NVARCHAR(MAX),
                     ErrorTimestamp DATETIME2 DEFAULT GETUTCDATE()
                 )
             END",
            obj = self.object_name(&self.tables.error),
            table = self.table(&self.tables.error)
        );
        conn.execute(sql, &[]).await?;

        let sql = format!(
            "IF OBJECT_ID({obj}, 'U') IS NULL
             BEGIN
                 CREATE TABLE {table} (
                     BatchJobID UNIQUEIDENTIFIER PRIMARY KEY,
                     DirectoryPath NVARCHAR(MAX),
                     TotalFiles INT,
                     FilesProcessed INT,
                     FilesFailed INT,
                     BatchStartTime DATETIME2,
                     BatchEndTime DATETIME2,
                     BatchStatus NVARCHAR(50),
                     IsResumed BIT DEFAULT 0
                 )
             END",
            obj = self.object_name(&self.tables.batch),
            table = self.table(&self.tables.batch)
        );
        conn.execute(sql, &[]).await?;

        let sql = format!(
            "IF COL_LENGTH({obj}, 'IsResumed') IS NULL
                 ALTER TABLE {table} ADD IsResumed BIT DEFAULT 0",
            obj = self.object_name(&self.tables.batch),
            table = self.table(&self.tables.batch)
        );
        conn.execute(sql, &[]).await?;

        info!(
            "Statistics tables ready: {}, {}, {}",
            self.tables.job, self.tables.batch, self.tables.error
        );
        Ok(())
    }

    pub async fn write_job_statistics(&self, stats: &JobStatistics) -> Result<()> {
        let mut conn = self.target.get_conn().await?;
        let sql = format!(
            "INSERT INTO {} (JobRunID, JobStartTime, JobEndTime, JobDurationSeconds, JobStatus,
                             SourceFile, TargetTable, RowsRead, RowsInserted, RowsUpdated,
                             RowsFailed, ErrorMessage, BatchJobID)
             VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9, @P10, @P11, @P12, @P13)",
            self.table(&self.tables.job)
        );
        conn.execute(
            sql,
            &[
                &stats.job_run_id,
                &stats.start_time.naive_utc(),
                &stats.end_time.naive_utc(),
                &int_column(stats.duration_seconds),
                &stats.status.as_str(),
                &stats.source_file.as_str(),
                &stats.target_table.as_str(),
                &int_column(stats.rows_read),
                &int_column(stats.rows_inserted),
                &int_column(stats.rows_updated),
                &int_column(stats.rows_failed),
                &stats.error_message,
                &stats.batch_job_id,
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn write_error_log(&self, entry: &ErrorLogEntry) -> Result<()> {
        let mut conn = self.target.get_conn().await?;
        let sql = format!(
            "INSERT INTO {} (JobRunID, TableName, ColumnName, ErrorType, ErrorMessage, ErrorTimestamp)
             VALUES (@P1, @P2, @P3, @P4, @P5, @P6)",
            self.table(&self.tables.error)
        );
        conn.execute(
            sql,
            &[
                &entry.job_run_id,
                &entry.table_name.as_str(),
                &entry.column_name,
                &entry.error_type.as_str(),
                &entry.error_message.as_str(),
                &entry.timestamp.naive_utc(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn find_resumable_batch(
        &self,
        directory: &str,
        max_age_hours: u32,
    ) -> Result<Option<BatchJobRecord>> {
        let mut conn = self.target.get_conn().await?;
        let sql = format!(
            "SELECT TOP 1 BatchJobID, DirectoryPath, TotalFiles, FilesProcessed, FilesFailed,
                    BatchStartTime, BatchEndTime, BatchStatus, IsResumed
             FROM {}
             WHERE DirectoryPath = @P1
               AND BatchStatus IN ('InProgress', 'Failed')
               AND BatchStartTime > DATEADD(hour, -@P2, GETUTCDATE())
             ORDER BY BatchStartTime DESC",
            self.table(&self.tables.batch)
        );
        let hours = i32::try_from(max_age_hours).unwrap_or(i32::MAX);
        let stream = conn.query(sql, &[&directory, &hours]).await?;
        let row: Option<Row> = stream.into_first_result().await?.into_iter().next();

        row.map(|row| -> Result<BatchJobRecord> {
            let status: &str = row.get(7).ok_or_else(|| missing("BatchStatus"))?;
            Ok(BatchJobRecord {
                batch_job_id: row.get(0).ok_or_else(|| missing("BatchJobID"))?,
                directory_path: row
                    .get::<&str, _>(1)
                    .ok_or_else(|| missing("DirectoryPath"))?
                    .to_string(),
                total_files: i64::from(row.get::<i32, _>(2).unwrap_or(0)),
                files_processed: i64::from(row.get::<i32, _>(3).unwrap_or(0)),
                files_failed: i64::from(row.get::<i32, _>(4).unwrap_or(0)),
                start_time: row
                    .get::<NaiveDateTime, _>(5)
                    .map(to_utc)
                    .ok_or_else(|| missing("BatchStartTime"))?,
                end_time: row.get::<NaiveDateTime, _>(6).map(to_utc),
                status: BatchStatus::parse(status)?,
                is_resumed: row.get::<bool, _>(8).unwrap_or(false),
            })
        })
        .transpose()
    }

    pub async fn insert_batch(&self, batch: &BatchJobRecord) -> Result<()> {
        let mut conn = self.target.get_conn().await?;
        let sql = format!(
            "INSERT INTO {} (BatchJobID, DirectoryPath, TotalFiles, FilesProcessed, FilesFailed,
                             BatchStartTime, BatchEndTime, BatchStatus, IsResumed)
             VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9)",
            self.table(&self.tables.batch)
        );
        conn.execute(
            sql,
            &[
                &batch.batch_job_id,
                &batch.directory_path.as_str(),
                &int_column(batch.total_files),
                &int_column(batch.files_processed),
                &int_column(batch.files_failed),
                &batch.start_time.naive_utc(),
                &batch.end_time.map(|t| t.naive_utc()),
                &batch.status.as_str(),
                &batch.is_resumed,
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn mark_resumed(&self, batch_job_id: Uuid) -> Result<()> {
        let mut conn = self.target.get_conn().await?;
        let sql = format!(
            "UPDATE {} SET BatchStatus = 'InProgress', IsResumed = 1 WHERE BatchJobID = @P1",
            self.table(&self.tables.batch)
        );
        conn.execute(sql, &[&batch_job_id]).await?;
        Ok(())
    }

    pub async fn update_batch(&self, batch: &BatchJobRecord) -> Result<()> {
        let mut conn = self.target.get_conn().await?;
        let sql = format!(
            "UPDATE {}
             SET TotalFiles = @P2, FilesProcessed = @P3, FilesFailed = @P4,
                 BatchEndTime = @P5, BatchStatus = @P6
             WHERE BatchJobID = @P1",
            self.table(&self.tables.batch)
        );
        conn.execute(
            sql,
            &[
                &batch.batch_job_id,
                &int_column(batch.total_files),
                &int_column(batch.files_processed),
                &int_column(batch.files_failed),
                &batch.end_time.map(|t| t.naive_utc()),
                &batch.status.as_str(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn file_outcomes(&self, batch_job_id: Uuid) -> Result<Vec<FileOutcome>> {
        let mut conn = self.target.get_conn().await?;
        let sql = format!(
            "SELECT SourceFile, JobStatus
             FROM {}
             WHERE BatchJobID = @P1
             ORDER BY JobEndTime",
            self.table(&self.tables.job)
        );
        let stream = conn.query(sql, &[&batch_job_id]).await?;
        let rows = stream.into_first_result().await?;

        rows.iter()
            .map(|row| -> Result<FileOutcome> {
                let source_file: &str = row.get(0).ok_or_else(|| missing("SourceFile"))?;
                let status: &str = row.get(1).ok_or_else(|| missing("JobStatus"))?;
                Ok(FileOutcome {
                    source_file: source_file.to_string(),
                    status: JobStatus::parse(status)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl StatsBackend for MssqlStatsBackend {
    async fn init_schema(&self) -> Result<()> {
        MssqlStatsBackend::init_schema(self).await
    }

    async fn write_job_statistics(&self, stats: &JobStatistics) -> Result<()> {
        MssqlStatsBackend::write_job_statistics(self, stats).await
    }

    async fn write_error_log(&self, entry: &ErrorLogEntry) -> Result<()> {
        MssqlStatsBackend::write_error_log(self, entry).await
    }

    async fn find_resumable_batch(
        &self,
        directory: &str,
        max_age_hours: u32,
    ) -> Result<Option<BatchJobRecord>> {
        MssqlStatsBackend::find_resumable_batch(self, directory, max_age_hours).await
    }

    async fn insert_batch(&self, batch: &BatchJobRecord) -> Result<()> {
        MssqlStatsBackend::insert_batch(self, batch).await
    }

    async fn mark_resumed(&self, batch_job_id: Uuid) -> Result<()> {
        MssqlStatsBackend::mark_resumed(self, batch_job_id).await
    }

    async fn update_batch(&self, batch: &BatchJobRecord) -> Result<()> {
        MssqlStatsBackend::update_batch(self, batch).await
    }

    async fn file_outcomes(&self, batch_job_id: Uuid) -> Result<Vec<FileOutcome>> {
        MssqlStatsBackend::file_outcomes(self, batch_job_id).await
    }

    fn backend_type(&self) -> &'static str {
        "mssql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_column_saturates() {
        assert_eq!(int_column(1_250), 1_250);
        assert_eq!(int_column(i64::from(i32::MAX) + 1), i32::MAX);
        assert_eq!(int_column(5_000_000_000), i32::MAX);
        assert_eq!(int_column(i64::MIN), i32::MIN);
    }
}
