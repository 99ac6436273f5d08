//! In-memory tabular dataset produced by the file readers.
//!
//! A [`Dataset`] is column-major: inference walks whole columns, the load
//! engine reads rows through [`Dataset::row`]. Cells are `Option<String>`
//! so a missing value stays distinguishable from an empty string.

mod reader;

pub use reader::{detect_file_type, parse_dataset};

use crate::error::{LoadError, Result};
use crate::inference::{is_numeric, parse_datetime};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// Input file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Psv,
    Json,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Psv => "psv",
            FileType::Json => "json",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a column's raw contents look as a whole.
///
/// Only `Text` matters to inference: such columns are typed as strings
/// without sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    /// Every non-null cell is a number (or the column is empty).
    Numeric,
    /// Every non-null cell is a number or a datetime, with at least one datetime.
    Temporal,
    /// Anything else.
    Text,
}

/// A named column of raw cells.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub kind: RawKind,
    pub values: Vec<Option<String>>,
}

impl Column {
    /// Build a column and classify its raw kind over all cells.
    pub fn new(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        let kind = classify(&values);
        Self {
            name: name.into(),
            kind,
            values,
        }
    }
}

fn classify(values: &[Option<String>]) -> RawKind {
    let mut saw_datetime = false;
    for value in values.iter().flatten() {
        let trimmed = value.trim();
        if trimmed.is_empty() || is_numeric(trimmed) {
            continue;
        }
        if parse_datetime(trimmed).is_some() {
            saw_datetime = true;
            continue;
        }
        return RawKind::Text;
    }
    if saw_datetime {
        RawKind::Temporal
    } else {
        RawKind::Numeric
    }
}

/// A parsed input file.
#[derive(Debug, Clone)]
pub struct Dataset {
    source: PathBuf,
    file_type: FileType,
    columns: Vec<Column>,
    row_count: usize,
}

impl Dataset {
    /// Build a dataset from equally long columns.
    pub fn new(source: impl Into<PathBuf>, file_type: FileType, columns: Vec<Column>) -> Self {
        let row_count = columns.iter().map(|c| c.values.len()).max().unwrap_or(0);
        let columns = columns
            .into_iter()
            .map(|mut c| {
                c.values.resize(row_count, None);
                c
            })
            .collect();
        Self {
            source: source.into(),
            file_type,
            columns,
            row_count,
        }
    }

    /// Detect the format of `path` and read it.
    pub async fn read(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoadError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        let file_type = detect_file_type(path, content)?;
        parse_dataset(path, file_type, content)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Raw cells of row `index`, in column order.
    pub fn row(&self, index: usize) -> Vec<Option<&str>> {
        self.columns
            .iter()
            .map(|c| c.values.get(index).and_then(|v| v.as_deref()))
            .collect()
    }

    /// Row `index` as a JSON object, for failure reports.
    pub fn row_json(&self, index: usize) -> Value {
        let mut map = Map::new();
        for column in &self.columns {
            let value = match column.values.get(index).and_then(|v| v.as_deref()) {
                Some(s) => Value::String(s.to_string()),
                None => Value::Null,
            };
            map.insert(column.name.clone(), value);
        }
        Value::Object(map)
    }
}
