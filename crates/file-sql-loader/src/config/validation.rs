//! Configuration validation.

use super::{Config, StatsBackendKind};
use crate::error::{LoadError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Database validation
    if config.database.host.is_empty() {
        return Err(LoadError::Config("database.host is required".into()));
    }
    if config.database.database.is_empty() {
        return Err(LoadError::Config("database.database is required".into()));
    }
    if config.database.user.is_empty() {
        return Err(LoadError::Config("database.user is required".into()));
    }
    if config.database.r#type != "mssql" {
        return Err(LoadError::Config(format!(
            "database.type must be 'mssql', got '{}'",
            config.database.r#type
        )));
    }
    if config.database.max_connections == 0 {
        return Err(LoadError::Config(
            "database.max_connections must be at least 1".into(),
        ));
    }

    if config.batch_processing.max_resume_age_hours == 0 {
        return Err(LoadError::Config(
            "batch_processing.max_resume_age_hours must be at least 1".into(),
        ));
    }

    // Statistics
    let stats = &config.job_statistics;
    if stats.enabled {
        if stats.table_name.is_empty() || stats.batch_table_name.is_empty() {
            return Err(LoadError::Config(
                "job_statistics table names must not be empty".into(),
            ));
        }
        if stats.backend == StatsBackendKind::File && stats.state_file.is_none() {
            return Err(LoadError::Config(
                "job_statistics.state_file is required for the file backend".into(),
            ));
        }
    }
    if config.error_logging.enabled && config.error_logging.table_name.is_empty() {
        return Err(LoadError::Config(
            "error_logging.table_name must not be empty".into(),
        ));
    }

    // Manual length overrides
    for (table, overrides) in &config.tables {
        for (column, disputed) in &overrides.disputed_columns {
            if disputed.max_length == Some(0) {
                return Err(LoadError::Config(format!(
                    "tables.{}.disputed_columns.{}.max_length must be at least 1",
                    table, column
                )));
            }
        }
    }

    Ok(())
}
