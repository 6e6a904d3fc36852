//! # CSV catalog I/O
//!
//! Catalog files are plain CSV with optional leading metadata lines:
//!
//! ```text
//! # NEMOVER = 0.1.0
//! # QSOURCE = fit
//! name,RADeg,decDeg,fixed_y_c
//! ACT-CL J0001.0-0001,0.25,-0.02,3.2
//! ```
//!
//! Column types are inferred on read: all-integer columns become [`ColumnData::Int`], numeric
//! columns (including `nan` or empty cells) become [`ColumnData::Float`], anything else is
//! [`ColumnData::Text`]. `name` and `tileName`, and any column with zero-padded values, stay
//! text.
use std::fs;
use std::io::Write;

use camino::Utf8Path;
use log::debug;

use crate::catalog::{Catalog, ColumnData};
use crate::constants::{COL_NAME, COL_TILE};
use crate::nemo_errors::NemoError;

/// Columns always read as text.
const IDENTIFIER_COLUMNS: [&str; 2] = [COL_NAME, COL_TILE];

/// Split a `# KEY = value` line; `None` for plain comments.
fn parse_metadata_line(line: &str) -> Option<(String, String)> {
    let body = line.trim_start_matches('#').trim();
    let (key, value) = body.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// Zero-padded identifiers such as `007` or `-01`.
fn has_leading_zero(cell: &str) -> bool {
    let digits = cell.trim_start_matches(['+', '-']).as_bytes();
    digits.len() > 1 && digits[0] == b'0' && digits[1].is_ascii_digit()
}

fn infer_column(name: &str, cells: Vec<String>) -> ColumnData {
    if IDENTIFIER_COLUMNS.contains(&name) || cells.iter().any(|c| has_leading_zero(c)) {
        return ColumnData::Text(cells);
    }
    let non_empty = cells.iter().any(|c| !c.is_empty());
    if non_empty && cells.iter().all(|c| c.parse::<i64>().is_ok()) {
        return ColumnData::Int(cells.iter().filter_map(|c| c.parse().ok()).collect());
    }
    let floats: Option<Vec<f64>> = cells
        .iter()
        .map(|c| {
            if c.is_empty() {
                Some(f64::NAN)
            } else {
                c.parse::<f64>().ok()
            }
        })
        .collect();
    match floats {
        Some(v) => ColumnData::Float(v),
        None => ColumnData::Text(cells),
    }
}

/// Parse CSV catalog text (metadata lines, header, rows).
pub fn parse_csv(text: &str, origin: &str) -> Result<Catalog, NemoError> {
    let mut metadata = Vec::new();
    let mut body_start = 0;
    for line in text.split_inclusive('\n') {
        if !line.trim_start().starts_with('#') {
            break;
        }
        if let Some(kv) = parse_metadata_line(line) {
            metadata.push(kv);
        }
        body_start += line.len();
    }
    let body = &text[body_start..];

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(NemoError::MalformedTable {
            path: origin.to_string(),
            reason: "missing header row".into(),
        });
    }

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(NemoError::MalformedTable {
                path: origin.to_string(),
                reason: format!(
                    "row has {} fields, header has {}",
                    record.len(),
                    headers.len()
                ),
            });
        }
        for (col, value) in cells.iter_mut().zip(record.iter()) {
            col.push(value.to_string());
        }
    }

    let mut catalog = Catalog::new();
    for (name, col) in headers.iter().zip(cells) {
        catalog.add_column(name, infer_column(name, col))?;
    }
    for (k, v) in metadata {
        catalog.set_metadata(&k, &v);
    }
    debug!("Parsed {origin}: {catalog}");
    Ok(catalog)
}

/// Read a CSV catalog from disk.
pub fn read_csv(path: &Utf8Path) -> Result<Catalog, NemoError> {
    let text = fs::read_to_string(path)?;
    parse_csv(&text, path.as_str())
}

/// Write a catalog as CSV (metadata first), overwriting `path`.
pub fn write_csv(catalog: &Catalog, path: &Utf8Path) -> Result<(), NemoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = fs::File::create(path)?;
    for (k, v) in catalog.metadata() {
        writeln!(file, "# {k} = {v}")?;
    }

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(catalog.column_names())?;
    for i in 0..catalog.len() {
        writer.write_record(catalog.columns().iter().map(|c| c.data.format(i)))?;
    }
    writer.flush()?;
    Ok(())
}
