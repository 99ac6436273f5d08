//! Raw cell to typed value conversion.

use crate::core::{Row, SqlNullType, SqlValue};
use crate::error::RowConversionError;
use crate::inference::{parse_datetime, parse_decimal, parse_integer};
use crate::schema::ColumnDecision;
use crate::typemap::SqlType;

fn null_type(sql_type: SqlType) -> SqlNullType {
    match sql_type {
        SqlType::Integer => SqlNullType::I64,
        SqlType::Decimal => SqlNullType::Decimal,
        SqlType::DateTime => SqlNullType::DateTime,
        SqlType::Varchar(_) => SqlNullType::String,
    }
}

/// Convert one cell according to its column type. Nullability is not checked.
///
/// Text columns keep blank strings; typed columns read them as NULL.
pub fn convert_cell(
    raw: Option<&str>,
    column: &ColumnDecision,
) -> Result<SqlValue, RowConversionError> {
    let sql_type = column.sql_type;
    let raw = match raw {
        Some(s) if sql_type.is_text() || !s.trim().is_empty() => s,
        _ => return Ok(SqlValue::Null(null_type(sql_type))),
    };

    match sql_type {
        SqlType::Varchar(_) => Ok(SqlValue::Text(raw.to_string())),
        SqlType::Integer => parse_integer(raw).map(SqlValue::I64).ok_or_else(|| {
            RowConversionError::InvalidInteger {
                column: column.name.clone(),
                value: raw.to_string(),
            }
        }),
        SqlType::Decimal => parse_decimal(raw).map(SqlValue::Decimal).ok_or_else(|| {
            RowConversionError::InvalidDecimal {
                column: column.name.clone(),
                value: raw.to_string(),
            }
        }),
        SqlType::DateTime => parse_datetime(raw).map(SqlValue::DateTime).ok_or_else(|| {
            RowConversionError::InvalidDatetime {
                column: column.name.clone(),
                value: raw.to_string(),
            }
        }),
    }
}

/// Convert a row, keeping the raw string wherever a typed parse fails.
pub fn convert_row(raw: &[Option<&str>], columns: &[ColumnDecision]) -> Row {
    columns
        .iter()
        .zip(raw)
        .map(|(column, cell)| {
            convert_cell(*cell, column).unwrap_or_else(|_| {
                SqlValue::Text(cell.map(str::to_string).unwrap_or_default())
            })
        })
        .collect()
}

/// Convert a row, failing on any unparseable cell or NULL in a NOT NULL column.
///
/// All failing columns of the row are reported, in column order.
pub fn validate_row(
    raw: &[Option<&str>],
    columns: &[ColumnDecision],
) -> Result<Row, Vec<RowConversionError>> {
    let mut row = Vec::with_capacity(columns.len());
    let mut errors = Vec::new();

    for (column, cell) in columns.iter().zip(raw) {
        match convert_cell(*cell, column) {
            Ok(value) if value.is_null() && !column.nullable => {
                errors.push(RowConversionError::NullNotAllowed {
                    column: column.name.clone(),
                });
            }
            Ok(value) => row.push(value),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(row)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn columns() -> Vec<ColumnDecision> {
        vec![
            ColumnDecision {
                name: "id".into(),
                sql_type: SqlType::Integer,
                nullable: false,
            },
            ColumnDecision {
                name: "price".into(),
                sql_type: SqlType::Decimal,
                nullable: true,
            },
            ColumnDecision {
                name: "sold_at".into(),
                sql_type: SqlType::DateTime,
                nullable: true,
            },
            ColumnDecision {
                name: "note".into(),
                sql_type: SqlType::Varchar(50),
                nullable: true,
            },
        ]
    }

    #[test]
    fn test_convert_row_typed_values() {
        let row = convert_row(
            &[Some("7"), Some("1.25"), Some("12/31/2023"), Some("hi")],
            &columns(),
        );
        assert_eq!(
            row,
            vec![
                SqlValue::I64(7),
                SqlValue::Decimal(Decimal::from_str("1.25").unwrap()),
                SqlValue::DateTime(
                    NaiveDate::from_ymd_opt(2023, 12, 31)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap()
                ),
                SqlValue::Text("hi".into()),
            ]
        );
    }

    #[test]
    fn test_convert_row_keeps_raw_on_failure() {
        let row = convert_row(&[Some("seven"), None, Some(" "), Some("")], &columns());
        assert_eq!(row[0], SqlValue::Text("seven".into()));
        assert_eq!(row[1], SqlValue::Null(SqlNullType::Decimal));
        assert_eq!(row[2], SqlValue::Null(SqlNullType::DateTime));
        assert_eq!(row[3], SqlValue::Text("".into()));
    }

    #[test]
    fn test_validate_row_reports_every_bad_column() {
        let errors = validate_row(
            &[None, Some("abc"), Some("2023-13-45"), Some("ok")],
            &columns(),
        )
        .unwrap_err();
        let columns: Vec<&str> = errors.iter().map(|e| e.column()).collect();
        assert_eq!(columns, vec!["id", "price", "sold_at"]);
        assert!(matches!(errors[0], RowConversionError::NullNotAllowed { .. }));
        assert!(matches!(errors[1], RowConversionError::InvalidDecimal { .. }));
        assert!(matches!(errors[2], RowConversionError::InvalidDatetime { .. }));
    }

    #[test]
    fn test_validate_row_ok() {
        let row = validate_row(&[Some("1"), None, None, None], &columns()).unwrap();
        assert_eq!(row.len(), 4);
        assert!(row[3].is_null());
    }
}
