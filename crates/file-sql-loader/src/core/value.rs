//! Typed cell values bound into destination inserts.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// Type hint carried by NULL values.
///
/// SQL Server parameters are typed even when NULL, so the insert path needs
/// to know which column type a missing value stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    I64,
    Decimal,
    DateTime,
    String,
}

/// A converted cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL with type hint.
    Null(SqlNullType),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// Fixed-point decimal.
    Decimal(Decimal),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Text, including raw strings kept when a typed parse failed.
    Text(String),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }
}

/// One converted row, in column order.
pub type Row = Vec<SqlValue>;
