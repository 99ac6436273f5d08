//! Core value types shared by conversion and the insert path.

pub mod value;

pub use value::{Row, SqlNullType, SqlValue};
