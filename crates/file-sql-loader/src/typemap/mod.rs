//! Resolution of column profiles to destination SQL types.

use crate::inference::ColumnProfile;
use std::fmt;
use tracing::info;

/// VARCHAR length buckets, ascending.
pub const VARCHAR_LADDER: [u32; 4] = [50, 100, 255, 500];

/// Longest declarable NVARCHAR; longer columns become NVARCHAR(MAX).
pub const NVARCHAR_MAX_LENGTH: u32 = 4000;

/// Resolved destination type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    /// Fixed DECIMAL(18,4).
    Decimal,
    DateTime,
    Varchar(u32),
}

impl SqlType {
    pub const DECIMAL_PRECISION: u8 = 18;
    pub const DECIMAL_SCALE: u8 = 4;

    /// SQL Server column type used in DDL.
    pub fn to_mssql(&self) -> String {
        match self {
            SqlType::Integer => "BIGINT".to_string(),
            SqlType::Decimal => format!(
                "DECIMAL({},{})",
                Self::DECIMAL_PRECISION,
                Self::DECIMAL_SCALE
            ),
            SqlType::DateTime => "DATETIME2".to_string(),
            SqlType::Varchar(n) if *n > NVARCHAR_MAX_LENGTH => "NVARCHAR(MAX)".to_string(),
            SqlType::Varchar(n) => format!("NVARCHAR({})", n),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, SqlType::Varchar(_))
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Integer => f.write_str("INTEGER"),
            SqlType::Decimal => write!(
                f,
                "DECIMAL({},{})",
                Self::DECIMAL_PRECISION,
                Self::DECIMAL_SCALE
            ),
            SqlType::DateTime => f.write_str("DATETIME"),
            SqlType::Varchar(n) => write!(f, "VARCHAR({})", n),
        }
    }
}

/// Pick the type for a profiled column.
///
/// Datetime wins over integer, integer over decimal; anything else is text.
/// A manual length override replaces the inferred text length verbatim.
pub fn resolve(profile: &ColumnProfile, length_override: Option<u32>) -> SqlType {
    let flags = profile.flags;
    if flags.all_datetime {
        return SqlType::DateTime;
    }
    if flags.all_integer {
        return SqlType::Integer;
    }
    if flags.all_decimal {
        return SqlType::Decimal;
    }

    match length_override {
        Some(length) => {
            info!(
                "Using manually configured max_length {} for column '{}'",
                length, profile.name
            );
            SqlType::Varchar(length)
        }
        None => SqlType::Varchar(varchar_length(profile.max_length)),
    }
}

/// Headroom added to lengths beyond the ladder.
pub const VARCHAR_HEADROOM: u32 = 100;

/// Smallest ladder bucket holding `max_length`; beyond the ladder,
/// `max_length + 100`.
pub fn varchar_length(max_length: usize) -> u32 {
    let observed = u32::try_from(max_length).unwrap_or(u32::MAX - VARCHAR_HEADROOM);
    VARCHAR_LADDER
        .iter()
        .copied()
        .find(|bucket| observed <= *bucket)
        .unwrap_or_else(|| observed.saturating_add(VARCHAR_HEADROOM))
}
