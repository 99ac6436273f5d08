//! Destination database abstraction.
//!
//! [`TargetDb`] covers the committed, out-of-transaction operations
//! (existence checks, drop, create). A [`LoadTransaction`] owns one
//! connection for the duration of a file load and is consumed by
//! `commit` or `rollback`.

pub mod mssql;

#[cfg(test)]
pub mod memory;

pub use mssql::MssqlTarget;

use crate::core::{Row, SqlValue};
use crate::error::Result;
use crate::schema::{ColumnDecision, SchemaPlan};
use crate::typemap::SqlType;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

/// Outcome of inserting a single row inside an open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowInsert {
    Inserted,
    /// The row was refused; the transaction is still usable.
    Rejected(String),
    /// The row was refused and the transaction can no longer commit.
    Aborted(String),
}

/// Outcome of inserting a whole batch inside an open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchInsert {
    Inserted(u64),
    /// The database refused the batch; nothing should be committed.
    Rejected(String),
}

/// Connection check result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub connected: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Destination database operations.
#[async_trait]
pub trait TargetDb: Send + Sync {
    /// Schema holding loaded tables.
    fn schema(&self) -> &str;

    /// Check if a table exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Drop a table if it exists.
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Create the table described by `plan`.
    async fn create_table(&self, plan: &SchemaPlan) -> Result<()>;

    /// Open a transaction for loading rows into `plan.table_name`.
    async fn begin_load(&self, plan: &SchemaPlan) -> Result<Box<dyn LoadTransaction>>;

    /// Run a trivial query and report latency.
    async fn health_check(&self) -> HealthCheckResult;
}

/// An open load transaction.
#[async_trait]
pub trait LoadTransaction: Send {
    /// Insert all rows as one unit.
    async fn insert_batch(&mut self, rows: &[Row]) -> Result<BatchInsert>;

    /// Insert one row, reporting a refusal as a value.
    async fn insert_row(&mut self, row: &Row) -> Result<RowInsert>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Largest absolute value a DECIMAL(18,4) column holds.
fn decimal_limit() -> Decimal {
    // 10^14 - 0.0001
    Decimal::new(999_999_999_999_999_999, 4)
}

/// Why the destination would refuse `row`, judged from the planned column
/// types. `None` means the row fits.
///
/// Raw strings kept for typed columns, text longer than the declared
/// length, out-of-range decimals and NULLs in NOT NULL columns are all
/// refused.
pub fn rejection_reason(columns: &[ColumnDecision], row: &Row) -> Option<String> {
    for (column, value) in columns.iter().zip(row) {
        let reason = match (value, column.sql_type) {
            (SqlValue::Null(_), _) if !column.nullable => Some(format!(
                "Cannot insert the value NULL into column '{}'",
                column.name
            )),
            (SqlValue::Text(s), SqlType::Integer)
            | (SqlValue::Text(s), SqlType::Decimal)
            | (SqlValue::Text(s), SqlType::DateTime) => Some(format!(
                "Conversion failed when converting the nvarchar value '{}' to data type {} in column '{}'",
                s,
                column.sql_type.to_mssql().to_lowercase(),
                column.name
            )),
            (SqlValue::Text(s), SqlType::Varchar(n)) if s.chars().count() > n as usize => {
                Some(format!(
                    "String or binary data would be truncated in column '{}'",
                    column.name
                ))
            }
            (SqlValue::Decimal(d), SqlType::Decimal)
                if d.round_dp(SqlType::DECIMAL_SCALE as u32).abs() > decimal_limit() =>
            {
                Some(format!(
                    "Arithmetic overflow error converting {} to data type numeric in column '{}'",
                    d, column.name
                ))
            }
            _ => None,
        };
        if reason.is_some() {
            return reason;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlNullType;
    use std::str::FromStr;

    fn columns() -> Vec<ColumnDecision> {
        vec![
            ColumnDecision {
                name: "id".into(),
                sql_type: SqlType::Integer,
                nullable: false,
            },
            ColumnDecision {
                name: "amount".into(),
                sql_type: SqlType::Decimal,
                nullable: true,
            },
            ColumnDecision {
                name: "code".into(),
                sql_type: SqlType::Varchar(3),
                nullable: true,
            },
        ]
    }

    #[test]
    fn test_valid_row_passes() {
        let row = vec![
            SqlValue::I64(1),
            SqlValue::Decimal(Decimal::from_str("12.5").unwrap()),
            SqlValue::Text("abc".into()),
        ];
        assert_eq!(rejection_reason(&columns(), &row), None);
    }

    #[test]
    fn test_raw_string_in_typed_column() {
        let row = vec![
            SqlValue::Text("x1".into()),
            SqlValue::Null(SqlNullType::Decimal),
            SqlValue::Null(SqlNullType::String),
        ];
        let reason = rejection_reason(&columns(), &row).unwrap();
        assert!(reason.contains("'x1'"));
        assert!(reason.contains("bigint"));
    }

    #[test]
    fn test_null_in_not_null_column() {
        let row = vec![
            SqlValue::Null(SqlNullType::I64),
            SqlValue::Null(SqlNullType::Decimal),
            SqlValue::Null(SqlNullType::String),
        ];
        assert!(rejection_reason(&columns(), &row)
            .unwrap()
            .contains("NULL into column 'id'"));
    }

    #[test]
    fn test_truncation_and_overflow() {
        let long = vec![
            SqlValue::I64(1),
            SqlValue::Null(SqlNullType::Decimal),
            SqlValue::Text("abcd".into()),
        ];
        assert!(rejection_reason(&columns(), &long)
            .unwrap()
            .contains("truncated"));

        let huge = vec![
            SqlValue::I64(1),
            SqlValue::Decimal(Decimal::from_str("123456789012345").unwrap()),
            SqlValue::Null(SqlNullType::String),
        ];
        assert!(rejection_reason(&columns(), &huge)
            .unwrap()
            .contains("Arithmetic overflow"));
    }
}
