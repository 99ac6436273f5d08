//! Schema planning: table names, column type decisions and DDL.

pub mod policy;

pub use policy::{TableAction, TablePolicy};

use crate::config::{DdlConfig, TableOverrides};
use crate::inference::ColumnProfile;
use crate::typemap::{self, SqlType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use tracing::info;

static NUMERIC_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_\d{3,}$").unwrap());
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").unwrap());

/// Prefix for table names that would start with a digit.
pub const DIGIT_PREFIX: &str = "t_";

/// Derive the destination table name from a source file path.
///
/// Pure: the same file name always gives the same table, which is what
/// lets `append` runs keep feeding one table.
pub fn table_name_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stripped = NUMERIC_SUFFIX.replace(&stem, "");
    let cleaned = NON_WORD.replace_all(&stripped, "_");
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("{}{}", DIGIT_PREFIX, cleaned)
    } else {
        cleaned.into_owned()
    }
}

/// Quote a SQL Server identifier.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `[schema].[table]`
pub fn qualify(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Resolved type and nullability of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDecision {
    pub name: String,
    #[serde(serialize_with = "serialize_type_tag")]
    pub sql_type: SqlType,
    pub nullable: bool,
}

fn serialize_type_tag<S: serde::Serializer>(t: &SqlType, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(t)
}

/// Destination table layout for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaPlan {
    pub table_name: String,
    pub columns: Vec<ColumnDecision>,
}

impl SchemaPlan {
    /// Resolve every profiled column, keeping input column order.
    pub fn build(
        table_name: &str,
        profiles: &[ColumnProfile],
        ddl: &DdlConfig,
        overrides: Option<&TableOverrides>,
    ) -> Self {
        let columns: Vec<ColumnDecision> = profiles
            .iter()
            .map(|profile| {
                let length_override = overrides
                    .and_then(|o| o.disputed_columns.get(&profile.name))
                    .and_then(|c| c.max_length);
                ColumnDecision {
                    name: profile.name.clone(),
                    sql_type: typemap::resolve(profile, length_override),
                    nullable: !ddl.not_null_columns.contains(&profile.name),
                }
            })
            .collect();

        info!("Inferred SQL types for {}:", table_name);
        for (decision, profile) in columns.iter().zip(profiles) {
            let samples: Vec<&str> = profile
                .sample_values
                .iter()
                .take(3)
                .map(String::as_str)
                .collect();
            info!(
                "  {}: {} (samples: {})",
                decision.name,
                decision.sql_type,
                samples.join(", ")
            );
        }

        Self {
            table_name: table_name.to_string(),
            columns,
        }
    }

    /// `CREATE TABLE` statement for SQL Server.
    pub fn create_table_sql(&self, schema: &str) -> String {
        let col_defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let null_str = if c.nullable { "NULL" } else { "NOT NULL" };
                format!(
                    "{} {} {}",
                    quote_ident(&c.name),
                    c.sql_type.to_mssql(),
                    null_str
                )
            })
            .collect();

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            qualify(schema, &self.table_name),
            col_defs.join(",\n    ")
        )
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisputedColumn;
    use crate::dataset::{Column, Dataset, FileType};
    use crate::inference::infer;

    #[test]
    fn test_table_name_strips_numeric_suffix() {
        assert_eq!(table_name_for(Path::new("sales_data_007.csv")), "sales_data");
        assert_eq!(table_name_for(Path::new("/in/orders_20240101.psv")), "orders");
        assert_eq!(table_name_for(Path::new("orders_12.csv")), "orders_12");
    }

    #[test]
    fn test_table_name_digit_prefix() {
        assert_eq!(table_name_for(Path::new("2024_report.csv")), "t_2024_report");
    }

    #[test]
    fn test_table_name_replaces_non_word() {
        assert_eq!(table_name_for(Path::new("daily sales-v2.json")), "daily_sales_v2");
    }

    #[test]
    fn test_table_name_is_deterministic() {
        let path = Path::new("/data/in/Customer List_001.csv");
        assert_eq!(table_name_for(path), table_name_for(path));
        assert_eq!(table_name_for(path), "Customer_List");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("a]b"), "[a]]b]");
        assert_eq!(qualify("dbo", "orders"), "[dbo].[orders]");
    }

    fn sample_dataset() -> Dataset {
        let col = |name: &str, values: &[Option<&str>]| {
            Column::new(name, values.iter().map(|v| v.map(String::from)).collect())
        };
        Dataset::new(
            "customers.csv",
            FileType::Csv,
            vec![
                col("id", &[Some("1"), Some("2")]),
                col("balance", &[Some("10.50"), Some("3")]),
                col("joined", &[Some("2023-05-01"), None]),
                col("notes", &[Some("x".repeat(60).as_str()), Some("y")]),
            ],
        )
    }

    #[test]
    fn test_plan_and_ddl() {
        let dataset = sample_dataset();
        let profiles = infer(&dataset);
        let mut ddl = DdlConfig::default();
        ddl.not_null_columns.insert("id".to_string());

        let plan = SchemaPlan::build("customers", &profiles, &ddl, None);
        let tags: Vec<String> = plan.columns.iter().map(|c| c.sql_type.to_string()).collect();
        assert_eq!(tags, vec!["INTEGER", "DECIMAL(18,4)", "DATETIME", "VARCHAR(100)"]);
        assert!(!plan.columns[0].nullable);
        assert!(plan.columns[1].nullable);

        let sql = plan.create_table_sql("dbo");
        assert_eq!(
            sql,
            "CREATE TABLE [dbo].[customers] (\n    [id] BIGINT NOT NULL,\n    [balance] DECIMAL(18,4) NULL,\n    [joined] DATETIME2 NULL,\n    [notes] NVARCHAR(100) NULL\n)"
        );
    }

    #[test]
    fn test_plan_applies_length_override() {
        let dataset = sample_dataset();
        let profiles = infer(&dataset);
        let mut overrides = TableOverrides::default();
        overrides.disputed_columns.insert(
            "notes".to_string(),
            DisputedColumn {
                max_length: Some(4000),
            },
        );
        let plan = SchemaPlan::build("customers", &profiles, &DdlConfig::default(), Some(&overrides));
        assert_eq!(plan.columns[3].sql_type, SqlType::Varchar(4000));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let dataset = sample_dataset();
        let a = SchemaPlan::build("customers", &infer(&dataset), &DdlConfig::default(), None);
        let b = SchemaPlan::build("customers", &infer(&dataset), &DdlConfig::default(), None);
        assert_eq!(a, b);
        assert_eq!(a.create_table_sql("dbo"), b.create_table_sql("dbo"));
    }

    #[test]
    fn test_plan_serializes_type_tags() {
        let dataset = sample_dataset();
        let plan = SchemaPlan::build("customers", &infer(&dataset), &DdlConfig::default(), None);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["columns"][0]["sql_type"], "INTEGER");
    }
}
