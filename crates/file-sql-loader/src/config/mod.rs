//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
database:
  host: localhost
  database: staging
  username: loader
  password: secret
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.database.port, 1433);
        assert_eq!(config.database.schema, "dbo");
        assert_eq!(config.database.user, "loader");
        assert_eq!(config.loader.table_mode, TableMode::DropRecreate);
        assert_eq!(config.loader.transaction_mode, TransactionMode::Tolerant);
        assert_eq!(config.loader.max_row_errors, 100);
        assert_eq!(config.loader.max_retries, 1);
        assert!(config.batch_processing.enable_checkpointing);
        assert!(config.batch_processing.resume_incomplete_batches);
        assert_eq!(config.batch_processing.max_resume_age_hours, 24);
        assert!(!config.job_statistics.enabled);
        assert_eq!(config.job_statistics.table_name, "EtlJobStatistics");
        assert_eq!(config.error_logging.table_name, "EtlJobError");
    }

    #[test]
    fn test_full_loader_section() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
loader:
  table_mode: append
  transaction_mode: strict
  max-row-errors: 5
  max_retries: 3
ddl:
  not_null_columns: [id, email]
tables:
  customers:
    disputed_columns:
      notes:
        max_length: 4000
"#
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.loader.table_mode, TableMode::Append);
        assert_eq!(config.loader.transaction_mode, TransactionMode::Strict);
        assert_eq!(config.loader.max_row_errors, 5);
        assert_eq!(config.loader.max_retries, 3);
        assert!(config.ddl.not_null_columns.contains("email"));
        let customers = &config.tables["customers"];
        assert_eq!(customers.disputed_columns["notes"].max_length, Some(4000));
        assert!(!customers.disputed_columns.contains_key("name"));
        assert!(!config.tables.contains_key("orders"));
    }

    #[test]
    fn test_unknown_table_mode_rejected() {
        let yaml = format!("{}loader:\n  table_mode: upsert\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
