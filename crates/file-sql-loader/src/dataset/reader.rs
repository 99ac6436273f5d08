//! File-type detection and the CSV / PSV / JSON readers.

use super::{Column, Dataset, FileType};
use crate::error::{LoadError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Lines inspected by [`detect_file_type`].
const DETECT_LINES: usize = 10;

/// Classify `content` as JSON, PSV or CSV.
///
/// JSON wins when the first line opens an array or object and the whole
/// content parses. Otherwise every non-blank line among the first ten must
/// carry the same non-zero count of `|` (PSV), or else of `,` (CSV).
pub fn detect_file_type(path: &Path, content: &str) -> Result<FileType> {
    let lines: Vec<&str> = content.lines().take(DETECT_LINES).collect();

    let first = lines.first().map(|l| l.trim()).unwrap_or("");
    if (first.starts_with('[') || first.starts_with('{'))
        && serde_json::from_str::<Value>(content).is_ok()
    {
        return Ok(FileType::Json);
    }

    let non_blank: Vec<&str> = lines.iter().copied().filter(|l| !l.trim().is_empty()).collect();
    if uniform_count(&non_blank, '|') {
        return Ok(FileType::Psv);
    }
    if uniform_count(&non_blank, ',') {
        return Ok(FileType::Csv);
    }

    Err(LoadError::FileTypeUndetectable {
        path: path.to_path_buf(),
        reason: "no consistent JSON, pipe or comma structure in the first lines".into(),
    })
}

fn uniform_count(lines: &[&str], delimiter: char) -> bool {
    let mut counts = lines.iter().map(|l| l.matches(delimiter).count());
    match counts.next() {
        Some(first) if first > 0 => counts.all(|c| c == first),
        _ => false,
    }
}

/// Parse `content` of a known type into a dataset.
pub fn parse_dataset(path: &Path, file_type: FileType, content: &str) -> Result<Dataset> {
    let columns = match file_type {
        FileType::Csv => read_delimited(content, b',')?,
        FileType::Psv => read_delimited(content, b'|')?,
        FileType::Json => read_json(path, content)?,
    };
    Ok(Dataset::new(path, file_type, columns))
}

fn read_delimited(content: &str, delimiter: u8) -> Result<Vec<Column>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = header_names(rdr.headers()?.iter());
    let mut values: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

    for record in rdr.records() {
        let record = record?;
        for (i, column) in values.iter_mut().enumerate() {
            let cell = record
                .get(i)
                .filter(|f| !f.is_empty())
                .map(|f| f.to_string());
            column.push(cell);
        }
    }

    Ok(headers
        .into_iter()
        .zip(values)
        .map(|(name, values)| Column::new(name, values))
        .collect())
}

/// Blank headers become `Unnamed: {i}`, repeated names get `.1`, `.2`, ...
fn header_names<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.enumerate()
        .map(|(i, h)| {
            let base = match h.trim() {
                "" => format!("Unnamed: {}", i),
                trimmed => trimmed.to_string(),
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let name = if *count == 0 {
                base
            } else {
                format!("{}.{}", base, count)
            };
            *count += 1;
            name
        })
        .collect()
}

fn read_json(path: &Path, content: &str) -> Result<Vec<Column>> {
    match serde_json::from_str::<Value>(content)? {
        Value::Array(records) => Ok(json_records(records)),
        Value::Object(columns) => Ok(columns
            .into_iter()
            .map(|(name, cells)| Column::new(name, json_column(cells)))
            .collect()),
        _ => Err(LoadError::FileTypeUndetectable {
            path: path.to_path_buf(),
            reason: "JSON must be an array of records or an object of columns".into(),
        }),
    }
}

/// `[{col: v, ...}, ...]`; columns appear in first-seen key order.
fn json_records(records: Vec<Value>) -> Vec<Column> {
    let mut names: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut values: Vec<Vec<Option<String>>> = Vec::new();

    for (row, record) in records.into_iter().enumerate() {
        let Value::Object(fields) = record else {
            continue;
        };
        for (key, cell) in fields {
            let col = *index.entry(key.clone()).or_insert_with(|| {
                names.push(key);
                values.push(Vec::new());
                values.len() - 1
            });
            let column = &mut values[col];
            column.resize(row, None);
            column.push(json_cell(cell));
        }
    }

    names
        .into_iter()
        .zip(values)
        .map(|(name, values)| Column::new(name, values))
        .collect()
}

/// `[v, ...]` or `{"0": v, "1": v, ...}`.
fn json_column(cells: Value) -> Vec<Option<String>> {
    match cells {
        Value::Array(items) => items.into_iter().map(json_cell).collect(),
        Value::Object(items) => items.into_iter().map(|(_, v)| json_cell(v)).collect(),
        scalar => vec![json_cell(scalar)],
    }
}

fn json_cell(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        nested => Some(nested.to_string()),
    }
}
