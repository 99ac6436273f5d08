//! Error types for the loader library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for load operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The file could not be classified as CSV, PSV or JSON.
    #[error("Could not determine file type for {path}: {reason}")]
    FileTypeUndetectable { path: PathBuf, reason: String },

    /// The input file does not exist (or vanished before processing).
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Inference could not type a column; the column degrades to text.
    #[error("Schema inference failed for column {column}: {message}")]
    SchemaInference { column: String, message: String },

    /// Target table exists and `table_mode` is `fail`.
    #[error("Table {0} already exists and table_mode is 'fail'")]
    TableConflict(String),

    /// A single value could not be converted to its column type.
    #[error("Row {row}: {source}")]
    RowConversion {
        row: usize,
        #[source]
        source: RowConversionError,
    },

    /// Tolerant mode saw more failing rows than `max-row-errors`.
    #[error("File {file} rejected: exceeded max-row-errors threshold ({failed} > {threshold})")]
    ThresholdExceeded {
        file: String,
        failed: usize,
        threshold: usize,
    },

    /// Strict mode pre-validation rejected the file.
    #[error("Pre-validation failed for {failed} rows of {file}")]
    Validation { file: String, failed: usize },

    /// A database operation failed in a way worth retrying.
    #[error("Transient database error: {0}")]
    TransientDatabase(String),

    /// Destination database error
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Statistics / checkpoint store error
    #[error("State error: {0}")]
    State(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delimited text reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The run was interrupted (SIGINT, SIGTERM) between files.
    #[error("Load cancelled")]
    Cancelled,
}

/// Why a raw value could not be converted for its destination column.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowConversionError {
    #[error("column '{column}': '{value}' is not a valid integer")]
    InvalidInteger { column: String, value: String },

    #[error("column '{column}': '{value}' is not a valid decimal")]
    InvalidDecimal { column: String, value: String },

    #[error("column '{column}': '{value}' does not match any supported datetime format")]
    InvalidDatetime { column: String, value: String },

    #[error("column '{column}': NULL is not allowed")]
    NullNotAllowed { column: String },
}

impl RowConversionError {
    /// The column the failure belongs to.
    pub fn column(&self) -> &str {
        match self {
            RowConversionError::InvalidInteger { column, .. }
            | RowConversionError::InvalidDecimal { column, .. }
            | RowConversionError::InvalidDatetime { column, .. }
            | RowConversionError::NullNotAllowed { column } => column,
        }
    }
}

impl LoadError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        LoadError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a TransientDatabase error
    pub fn transient(message: impl Into<String>) -> Self {
        LoadError::TransientDatabase(message.into())
    }

    /// Short name of the error kind, as written to the error log table.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Config(_) => "Config",
            LoadError::FileTypeUndetectable { .. } => "FileTypeUndetectable",
            LoadError::FileNotFound(_) => "FileNotFound",
            LoadError::SchemaInference { .. } => "SchemaInferenceFailure",
            LoadError::TableConflict(_) => "TableConflict",
            LoadError::RowConversion { .. } => "RowConversionError",
            LoadError::ThresholdExceeded { .. } => "ThresholdExceeded",
            LoadError::Validation { .. } => "ValidationFailure",
            LoadError::TransientDatabase(_) | LoadError::Database(_) | LoadError::Pool { .. } => {
                "TransientDatabaseError"
            }
            LoadError::State(_) => "State",
            LoadError::Io(_) => "Io",
            LoadError::Yaml(_) => "Yaml",
            LoadError::Json(_) => "Json",
            LoadError::Csv(_) => "Csv",
            LoadError::Cancelled => "Cancelled",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) | LoadError::Yaml(_) => 1,
            LoadError::Database(_) | LoadError::Pool { .. } | LoadError::TransientDatabase(_) => 2,
            LoadError::TableConflict(_) => 3,
            LoadError::FileTypeUndetectable { .. }
            | LoadError::SchemaInference { .. }
            | LoadError::RowConversion { .. }
            | LoadError::ThresholdExceeded { .. }
            | LoadError::Validation { .. }
            | LoadError::Csv(_)
            | LoadError::Json(_) => 4,
            LoadError::State(_) => 5,
            LoadError::Io(_) | LoadError::FileNotFound(_) => 7,
            LoadError::Cancelled => 130,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(LoadError::Config("x".into()).exit_code(), 1);
        assert_eq!(LoadError::TableConflict("t".into()).exit_code(), 3);
        assert_eq!(LoadError::FileNotFound(PathBuf::from("a.csv")).exit_code(), 7);
        assert_eq!(LoadError::transient("timeout").exit_code(), 2);
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let err = LoadError::RowConversion {
            row: 3,
            source: RowConversionError::InvalidInteger {
                column: "age".into(),
                value: "abc".into(),
            },
        };
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Row 3"));
        assert!(detailed.contains("Caused by:"));
        assert!(detailed.contains("'abc' is not a valid integer"));
    }

    #[test]
    fn test_conversion_error_column() {
        let err = RowConversionError::NullNotAllowed { column: "id".into() };
        assert_eq!(err.column(), "id");
    }
}
