//! Column type inference.
//!
//! Each column is summarized into a [`ColumnProfile`]. Type evidence is a
//! fold of [`TypeFlags::observe`] over the sampled values: flags start true
//! and can only be cleared, so a column never widens back to a narrower type.

use crate::dataset::{Column, Dataset, RawKind};
use crate::error::LoadError;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, warn};

/// Rows sampled per column for type evidence.
pub const SAMPLE_ROWS: usize = 1000;

/// Non-null values kept per column for diagnostics.
pub const SAMPLE_VALUES: usize = 10;

/// Accepted datetime layouts, tried in order.
pub const DATETIME_PATTERNS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y",
];

/// Parse a datetime using the first matching pattern.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DATETIME_PATTERNS.iter().find_map(|pattern| {
        if pattern.contains("%H") {
            NaiveDateTime::parse_from_str(value, pattern).ok()
        } else {
            NaiveDate::parse_from_str(value, pattern)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
    })
}

pub fn parse_integer(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

/// Plain (`12.50`) or scientific (`1.25e1`) notation.
pub fn parse_decimal(value: &str) -> Option<Decimal> {
    let value = value.trim();
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

pub fn is_numeric(value: &str) -> bool {
    parse_integer(value).is_some() || parse_decimal(value).is_some()
}

/// Narrowing type evidence for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFlags {
    pub all_numeric: bool,
    pub all_integer: bool,
    pub all_decimal: bool,
    pub all_datetime: bool,
}

impl TypeFlags {
    /// No evidence against any type yet.
    pub const UNKNOWN: TypeFlags = TypeFlags {
        all_numeric: true,
        all_integer: true,
        all_decimal: true,
        all_datetime: true,
    };

    /// Evidence against every narrower type.
    pub const TEXT: TypeFlags = TypeFlags {
        all_numeric: false,
        all_integer: false,
        all_decimal: false,
        all_datetime: false,
    };

    /// Fold one non-null value into the flags.
    #[must_use]
    pub fn observe(self, value: &str) -> TypeFlags {
        let mut next = self;
        if next.all_numeric && parse_integer(value).is_none() {
            next.all_integer = false;
            if parse_decimal(value).is_none() {
                next.all_numeric = false;
                next.all_decimal = false;
            }
        }
        if next.all_datetime && parse_datetime(value).is_none() {
            next.all_datetime = false;
        }
        next
    }

    pub fn is_text(&self) -> bool {
        !self.all_datetime && !self.all_integer && !self.all_decimal
    }
}

/// Per-column summary produced by inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnProfile {
    pub name: String,
    /// Longest value in characters, over the whole column.
    pub max_length: usize,
    /// Any null or blank value, over the whole column.
    pub has_nulls: bool,
    pub flags: TypeFlags,
    /// First non-null values, for diagnostics.
    pub sample_values: Vec<String>,
}

/// Profile every column of `dataset`, in column order.
pub fn infer(dataset: &Dataset) -> Vec<ColumnProfile> {
    let profiles: Vec<ColumnProfile> = dataset.columns().iter().map(profile_column).collect();
    debug!(
        "Inferred {} columns from {} rows of {}",
        profiles.len(),
        dataset.row_count().min(SAMPLE_ROWS),
        dataset.source().display()
    );
    profiles
}

/// Profile one column.
pub fn profile_column(column: &Column) -> ColumnProfile {
    let present = |v: &&String| !v.trim().is_empty();

    let has_nulls = column
        .values
        .iter()
        .any(|v| v.as_ref().map_or(true, |s| s.trim().is_empty()));

    let max_length = column
        .values
        .iter()
        .flatten()
        .map(|v| v.chars().count())
        .max()
        .unwrap_or(0);

    let sample_values: Vec<String> = column
        .values
        .iter()
        .flatten()
        .filter(present)
        .take(SAMPLE_VALUES)
        .cloned()
        .collect();

    let flags = if column.kind == RawKind::Text {
        TypeFlags::TEXT
    } else {
        let mut sampled = column
            .values
            .iter()
            .take(SAMPLE_ROWS)
            .flatten()
            .filter(present)
            .peekable();
        if sampled.peek().is_none() {
            let degraded = LoadError::SchemaInference {
                column: column.name.clone(),
                message: "no non-null values, typed as text".into(),
            };
            warn!("{}", degraded);
            TypeFlags::TEXT
        } else {
            sampled.fold(TypeFlags::UNKNOWN, |flags, v| flags.observe(v))
        }
    };

    ColumnProfile {
        name: column.name.clone(),
        max_length,
        has_nulls,
        flags,
        sample_values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::FileType;

    fn column(name: &str, values: &[Option<&str>]) -> Column {
        Column::new(name, values.iter().map(|v| v.map(String::from)).collect())
    }

    #[test]
    fn test_parse_datetime_patterns() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_datetime("2024-03-15"), Some(expected));
        assert_eq!(parse_datetime("03/15/2024"), Some(expected));
        assert_eq!(parse_datetime("15-03-2024"), Some(expected));
        assert_eq!(
            parse_datetime("2024-03-15 13:45:00"),
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(13, 45, 0)
        );
        assert_eq!(parse_datetime("2024-03-15T13:45:00"), None);
        assert_eq!(parse_datetime("15.03.2024"), None);
        assert_eq!(parse_datetime("42"), None);
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_integer(" 42 "), Some(42));
        assert_eq!(parse_integer("4.2"), None);
        assert_eq!(parse_decimal("12.5"), Decimal::from_str("12.5").ok());
        assert_eq!(parse_decimal("1.25e1"), Decimal::from_str("12.5").ok());
        assert_eq!(parse_decimal("abc"), None);
        assert!(is_numeric("-7"));
        assert!(!is_numeric("7a"));
    }

    #[test]
    fn test_observe_integer() {
        let flags = TypeFlags::UNKNOWN.observe("1").observe("22");
        assert!(flags.all_integer && flags.all_decimal && flags.all_numeric);
        assert!(!flags.all_datetime);
    }

    #[test]
    fn test_observe_decimal_clears_integer_only() {
        let flags = TypeFlags::UNKNOWN.observe("1").observe("2.5");
        assert!(!flags.all_integer);
        assert!(flags.all_decimal && flags.all_numeric);
    }

    #[test]
    fn test_flags_never_widen() {
        let narrowed = TypeFlags::UNKNOWN.observe("abc");
        assert_eq!(narrowed, TypeFlags::TEXT);
        assert_eq!(narrowed.observe("1").observe("2024-01-01"), TypeFlags::TEXT);

        let decimal = TypeFlags::UNKNOWN.observe("1.5");
        assert!(!decimal.observe("2").all_integer);
    }

    #[test]
    fn test_integer_implies_numeric_over_any_sequence() {
        let inputs = ["1", "x", "2.5", "2024-01-01", "", "-3", "1e3", "07/04/2020"];
        for start in 0..inputs.len() {
            let flags = inputs[start..]
                .iter()
                .fold(TypeFlags::UNKNOWN, |f, v| f.observe(v));
            if flags.all_integer || flags.all_decimal {
                assert!(flags.all_numeric);
            }
            if flags.all_datetime {
                assert!(!flags.all_integer && !flags.all_decimal);
            }
        }
    }

    #[test]
    fn test_profile_dates() {
        let profile = profile_column(&column(
            "created",
            &[Some("2024-01-01"), None, Some("01/02/2024 08:00:00")],
        ));
        assert!(profile.flags.all_datetime);
        assert!(profile.has_nulls);
        assert_eq!(profile.sample_values.len(), 2);
    }

    #[test]
    fn test_profile_text_short_circuits() {
        let profile = profile_column(&column("name", &[Some("1"), Some("Bob"), Some("2")]));
        assert_eq!(profile.flags, TypeFlags::TEXT);
        assert_eq!(profile.max_length, 3);
    }

    #[test]
    fn test_profile_all_null_is_text() {
        let profile = profile_column(&column("empty", &[None, Some("  "), None]));
        assert!(profile.flags.is_text());
        assert!(profile.has_nulls);
        assert!(profile.sample_values.is_empty());
    }

    #[test]
    fn test_sampling_window_and_full_column_length() {
        let mut values: Vec<Option<String>> = (0..SAMPLE_ROWS).map(|i| Some(i.to_string())).collect();
        values.push(Some("12345678901.5".to_string()));
        let profile = profile_column(&Column::new("n", values));

        // the decimal sits outside the sample window
        assert!(profile.flags.all_integer);
        assert_eq!(profile.max_length, 13);
        assert!(!profile.has_nulls);
    }

    #[test]
    fn test_sample_values_capped() {
        let values: Vec<Option<String>> = (0..50).map(|i| Some(i.to_string())).collect();
        let profile = profile_column(&Column::new("n", values));
        assert_eq!(profile.sample_values.len(), SAMPLE_VALUES);
        assert_eq!(profile.sample_values[0], "0");
    }

    #[test]
    fn test_infer_is_deterministic() {
        let dataset = Dataset::new(
            "orders.csv",
            FileType::Csv,
            vec![
                column("id", &[Some("1"), Some("2")]),
                column("price", &[Some("9.99"), None]),
                column("note", &[Some("a"), Some("b")]),
            ],
        );
        let first = infer(&dataset);
        assert_eq!(first, infer(&dataset));
        assert_eq!(first.len(), 3);
        assert!(first[0].flags.all_integer);
        assert!(!first[1].flags.all_integer && first[1].flags.all_decimal);
        assert!(first[2].flags.is_text());
    }
}
