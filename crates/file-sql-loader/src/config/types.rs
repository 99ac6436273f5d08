//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination database configuration (SQL Server).
    pub database: DatabaseConfig,

    /// Load behavior configuration.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// DDL generation options.
    #[serde(default)]
    pub ddl: DdlConfig,

    /// Per-table overrides, keyed by derived table name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableOverrides>,

    /// Directory batch checkpointing.
    #[serde(default)]
    pub batch_processing: BatchConfig,

    /// Per-file and per-batch statistics persistence.
    #[serde(default)]
    pub job_statistics: JobStatisticsConfig,

    /// Column-level error log.
    #[serde(default)]
    pub error_logging: ErrorLoggingConfig,

    /// Log file output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Destination database (SQL Server) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database type (always "mssql" for now).
    #[serde(default = "default_mssql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    #[serde(alias = "username")]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema that holds loaded tables (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt the connection (default: false).
    #[serde(default)]
    pub encrypt: bool,

    /// Trust the server certificate (default: true).
    #[serde(default = "default_true")]
    pub trust_server_cert: bool,

    /// Pool size. One connection carries the load transaction, the
    /// second one statistics writes (default: 2).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Load behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// What to do when the target table already exists.
    #[serde(default)]
    pub table_mode: TableMode,

    /// Strict (all-or-nothing) or tolerant (bounded partial success).
    #[serde(default)]
    pub transaction_mode: TransactionMode,

    /// Failed rows tolerated before a tolerant load is rolled back.
    #[serde(
        rename = "max-row-errors",
        alias = "max_row_errors",
        default = "default_max_row_errors"
    )]
    pub max_row_errors: usize,

    /// Extra attempts for a file whose processing raised an error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            table_mode: TableMode::default(),
            transaction_mode: TransactionMode::default(),
            max_row_errors: default_max_row_errors(),
            max_retries: default_max_retries(),
        }
    }
}

/// Existing-table handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMode {
    /// Drop an existing table and create it from the inferred schema.
    #[default]
    DropRecreate,

    /// Insert into an existing table, create if missing.
    Append,

    /// Refuse to load when the table exists.
    Fail,
}

/// Transaction strategy for a file load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Validate everything first, insert in one batch, commit atomically.
    Strict,

    /// Insert row by row, count failures, commit unless the threshold is exceeded.
    #[default]
    Tolerant,
}

/// DDL generation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DdlConfig {
    /// Columns emitted as NOT NULL.
    #[serde(default)]
    pub not_null_columns: BTreeSet<String>,
}

/// Per-table overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableOverrides {
    /// Manual settings for columns whose inferred length is disputed.
    #[serde(default)]
    pub disputed_columns: BTreeMap<String, DisputedColumn>,
}

/// Manual column settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisputedColumn {
    /// VARCHAR length used verbatim instead of the inferred bucket.
    #[serde(default)]
    pub max_length: Option<u32>,
}

/// Directory batch checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Record per-batch progress (default: true).
    #[serde(default = "default_true")]
    pub enable_checkpointing: bool,

    /// Continue an incomplete batch for the same directory (default: true).
    #[serde(default = "default_true")]
    pub resume_incomplete_batches: bool,

    /// Only batches started within this many hours are resumed (default: 24).
    #[serde(default = "default_max_resume_age_hours")]
    pub max_resume_age_hours: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enable_checkpointing: true,
            resume_incomplete_batches: true,
            max_resume_age_hours: default_max_resume_age_hours(),
        }
    }
}

/// Statistics persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatisticsConfig {
    /// Persist statistics at all (default: false).
    #[serde(default)]
    pub enabled: bool,

    /// Where statistics live.
    #[serde(default)]
    pub backend: StatsBackendKind,

    /// Per-file statistics table.
    #[serde(default = "default_job_stats_table")]
    pub table_name: String,

    /// Per-batch statistics table.
    #[serde(default = "default_batch_stats_table")]
    pub batch_table_name: String,

    /// JSON file used by the `file` backend.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl Default for JobStatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: StatsBackendKind::default(),
            table_name: default_job_stats_table(),
            batch_table_name: default_batch_stats_table(),
            state_file: None,
        }
    }
}

/// Statistics backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsBackendKind {
    /// Tables in the destination database.
    #[default]
    Database,

    /// A local JSON state file.
    File,
}

/// Column-level error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLoggingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_error_table")]
    pub table_name: String,
}

impl Default for ErrorLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            table_name: default_error_table(),
        }
    }
}

/// Log file output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory for `load_job_{run_id}.log` (default: "logs").
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    /// Level name: debug, info, warn, error (default: "info").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_mssql() -> String {
    "mssql".to_string()
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    2
}

fn default_max_row_errors() -> usize {
    100
}

fn default_max_retries() -> u32 {
    1
}

fn default_max_resume_age_hours() -> u32 {
    24
}

fn default_job_stats_table() -> String {
    "EtlJobStatistics".to_string()
}

fn default_batch_stats_table() -> String {
    "EtlBatchJobStatistics".to_string()
}

fn default_error_table() -> String {
    "EtlJobError".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}
