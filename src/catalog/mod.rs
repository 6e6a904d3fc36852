//! # Columnar catalogs
//!
//! A [`Catalog`] is an ordered table of named, typed columns. Row order is significant: it is the
//! order the driver restores after distributed processing (see [`crate::parallel`]).
//!
//! Modules
//! -----------------
//! * [`csv_io`](crate::catalog::csv_io) – CSV read/write with `# KEY = value` header metadata.
//! * [`parquet_reader`](crate::catalog::parquet_reader) – read-only Arrow/Parquet ingestion.
//!
//! Data Model
//! -----------------
//! * [`ColumnData`] – `Float(Vec<f64>)`, `Int(Vec<i64>)` or `Text(Vec<String>)`.
//! * [`Column`] – a name plus its data.
//! * [`Catalog`] – columns of equal length, plus ordered header metadata.
//!
//! Catalogs are mutated by column addition only; row-level operations ([`Catalog::take`],
//! [`Catalog::slice`], [`Catalog::concat`]) build new catalogs.
//!
//! Quick-Start
//! -----------------
//! ```rust,no_run
//! use nemo_mass::catalog::{Catalog, ColumnData};
//!
//! # fn run() -> Result<(), nemo_mass::nemo_errors::NemoError> {
//! let mut cat = Catalog::new();
//! cat.add_column("RADeg", ColumnData::Float(vec![10.0, 20.0]))?;
//! cat.add_column("decDeg", ColumnData::Float(vec![-5.0, -6.0]))?;
//! let first = cat.slice(0, 1);
//! assert_eq!(first.len(), 1);
//! # Ok(())
//! # }
//! ```
use std::fmt;

use camino::Utf8Path;
use itertools::Itertools;

use crate::nemo_errors::NemoError;

pub mod csv_io;
pub mod parquet_reader;

/// Typed storage for one catalog column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty column of the same type.
    fn empty_like(&self) -> ColumnData {
        match self {
            ColumnData::Float(_) => ColumnData::Float(Vec::new()),
            ColumnData::Int(_) => ColumnData::Int(Vec::new()),
            ColumnData::Text(_) => ColumnData::Text(Vec::new()),
        }
    }

    fn take(&self, indices: &[usize]) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Int(v) => ColumnData::Int(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Text(v) => {
                ColumnData::Text(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }

    fn slice(&self, start: usize, end: usize) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(v[start..end].to_vec()),
            ColumnData::Int(v) => ColumnData::Int(v[start..end].to_vec()),
            ColumnData::Text(v) => ColumnData::Text(v[start..end].to_vec()),
        }
    }

    /// Append `other`, promoting Int → Float and anything → Text when the types differ.
    fn extend(&mut self, other: &ColumnData) {
        let promoted = match (&mut *self, other) {
            (ColumnData::Float(a), ColumnData::Float(b)) => {
                a.extend_from_slice(b);
                None
            }
            (ColumnData::Int(a), ColumnData::Int(b)) => {
                a.extend_from_slice(b);
                None
            }
            (ColumnData::Text(a), ColumnData::Text(b)) => {
                a.extend_from_slice(b);
                None
            }
            (ColumnData::Float(a), ColumnData::Int(b)) => {
                a.extend(b.iter().map(|&v| v as f64));
                None
            }
            (ColumnData::Int(a), ColumnData::Float(b)) => {
                let mut widened: Vec<f64> = a.iter().map(|&v| v as f64).collect();
                widened.extend_from_slice(b);
                Some(ColumnData::Float(widened))
            }
            (this, other) => {
                let mut text: Vec<String> = (0..this.len()).map(|i| this.format(i)).collect();
                text.extend((0..other.len()).map(|i| other.format(i)));
                Some(ColumnData::Text(text))
            }
        };
        if let Some(data) = promoted {
            *self = data;
        }
    }

    /// Value at row `i` as `f64` (`NaN` for text).
    pub fn get_f64(&self, i: usize) -> f64 {
        match self {
            ColumnData::Float(v) => v[i],
            ColumnData::Int(v) => v[i] as f64,
            ColumnData::Text(v) => v[i].trim().parse().unwrap_or(f64::NAN),
        }
    }

    /// Value at row `i` as written to text outputs.
    pub fn format(&self, i: usize) -> String {
        match self {
            ColumnData::Float(v) => format_float(v[i]),
            ColumnData::Int(v) => v[i].to_string(),
            ColumnData::Text(v) => v[i].clone(),
        }
    }
}

pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        v.to_string()
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Ordered, columnar table with header metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    columns: Vec<Column>,
    metadata: Vec<(String, String)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a catalog, choosing the reader from the file extension (`.parquet`/`.pq` or CSV).
    pub fn read(path: &Utf8Path) -> Result<Self, NemoError> {
        match path.extension() {
            Some("parquet") | Some("pq") => parquet_reader::read_parquet(path),
            _ => csv_io::read_csv(path),
        }
    }

    /// Write the catalog as CSV, overwriting any existing file.
    pub fn write(&self, path: &Utf8Path) -> Result<(), NemoError> {
        csv_io::write_csv(self, path)
    }

    /// Number of rows (0 for a catalog without columns).
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn require(&self, name: &str) -> Result<&Column, NemoError> {
        self.column(name)
            .ok_or_else(|| NemoError::missing_column(name, "catalog"))
    }

    /// Numeric column as `f64` values (integer columns are widened).
    pub fn floats(&self, name: &str) -> Result<Vec<f64>, NemoError> {
        match &self.require(name)?.data {
            ColumnData::Float(v) => Ok(v.clone()),
            ColumnData::Int(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            ColumnData::Text(_) => Err(NemoError::NotNumericColumn(name.to_string())),
        }
    }

    /// Column rendered as strings.
    pub fn texts(&self, name: &str) -> Result<Vec<String>, NemoError> {
        let col = self.require(name)?;
        Ok((0..col.data.len()).map(|i| col.data.format(i)).collect())
    }

    /// Add a column, replacing any existing column of the same name in place.
    ///
    /// The first column defines the row count of an empty catalog.
    pub fn add_column(&mut self, name: &str, data: ColumnData) -> Result<(), NemoError> {
        if !self.columns.is_empty() && data.len() != self.len() {
            return Err(NemoError::ColumnLengthMismatch {
                column: name.to_string(),
                expected: self.len(),
                found: data.len(),
            });
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.data = data,
            None => self.columns.push(Column {
                name: name.to_string(),
                data,
            }),
        }
        Ok(())
    }

    /// Remove a column; returns it when present.
    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        let pos = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(pos))
    }

    /// Rename a column. Renaming onto an existing name replaces that column.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), NemoError> {
        self.require(from)?;
        if from == to {
            return Ok(());
        }
        self.drop_column(to);
        if let Some(col) = self.columns.iter_mut().find(|c| c.name == from) {
            col.name = to.to_string();
        }
        Ok(())
    }

    /// New catalog with the rows at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Catalog {
        Catalog {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.take(indices),
                })
                .collect(),
            metadata: self.metadata.clone(),
        }
    }

    /// New catalog with rows `[start, end)`, clipped to the table.
    pub fn slice(&self, start: usize, end: usize) -> Catalog {
        let end = end.min(self.len());
        let start = start.min(end);
        Catalog {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.slice(start, end),
                })
                .collect(),
            metadata: self.metadata.clone(),
        }
    }

    /// Stack catalogs vertically.
    ///
    /// The column set of the first non-trivial part is used; every other part must provide
    /// all of its columns. Metadata comes from the first part.
    pub fn concat(parts: &[Catalog]) -> Result<Catalog, NemoError> {
        let Some(template) = parts.iter().find(|p| !p.columns.is_empty()) else {
            return Ok(parts.first().cloned().unwrap_or_default());
        };

        let mut columns: Vec<Column> = template
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                data: c.data.empty_like(),
            })
            .collect();

        for part in parts.iter().filter(|p| !p.columns.is_empty()) {
            for col in columns.iter_mut() {
                let src = part
                    .column(&col.name)
                    .ok_or_else(|| NemoError::missing_column(&col.name, "gathered block"))?;
                col.data.extend(&src.data);
            }
        }

        Ok(Catalog {
            columns,
            metadata: template.metadata.clone(),
        })
    }

    /// Reorder rows by ascending value of a numeric column (stable).
    pub fn sort_by(&self, name: &str) -> Result<Catalog, NemoError> {
        let keys = self.floats(name)?;
        let order: Vec<usize> = (0..keys.len())
            .sorted_by(|&a, &b| keys[a].total_cmp(&keys[b]))
            .collect();
        Ok(self.take(&order))
    }

    /// Header metadata, in insertion order.
    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a metadata entry, replacing an existing key.
    pub fn set_metadata(&mut self, key: &str, value: &str) {
        match self.metadata.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.metadata.push((key.to_string(), value.to_string())),
        }
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "Catalog: {} rows", self.len())?;
            for col in &self.columns {
                let kind = match col.data {
                    ColumnData::Float(_) => "float",
                    ColumnData::Int(_) => "int",
                    ColumnData::Text(_) => "text",
                };
                writeln!(f, "  {:<24} {kind}", col.name)?;
            }
            Ok(())
        } else {
            write!(
                f,
                "Catalog({} rows × {} cols: {})",
                self.len(),
                self.columns.len(),
                self.column_names().join(", ")
            )
        }
    }
}

#[cfg(test)]
mod catalog_test {
    use super::*;

    fn sample() -> Catalog {
        let mut cat = Catalog::new();
        cat.add_column("name", ColumnData::Text(vec!["a".into(), "b".into(), "c".into()]))
            .unwrap();
        cat.add_column("x", ColumnData::Float(vec![3.0, 1.0, 2.0]))
            .unwrap();
        cat.add_column("idx", ColumnData::Int(vec![2, 0, 1])).unwrap();
        cat
    }

    #[test]
    fn test_add_and_replace_column() {
        let mut cat = sample();
        assert_eq!(cat.len(), 3);
        let err = cat
            .add_column("bad", ColumnData::Float(vec![1.0]))
            .unwrap_err();
        assert_eq!(
            err,
            NemoError::ColumnLengthMismatch {
                column: "bad".into(),
                expected: 3,
                found: 1
            }
        );
        cat.add_column("x", ColumnData::Float(vec![0.0; 3])).unwrap();
        assert_eq!(cat.column_names(), vec!["name", "x", "idx"]);
        assert_eq!(cat.floats("x").unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_take_slice_sort() {
        let cat = sample();
        let sorted = cat.sort_by("idx").unwrap();
        assert_eq!(sorted.texts("name").unwrap(), vec!["b", "c", "a"]);
        assert_eq!(cat.slice(1, 10).len(), 2);
        assert_eq!(cat.slice(5, 10).len(), 0);
        assert_eq!(cat.take(&[2, 2]).floats("x").unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_concat_restores_whole() {
        let cat = sample();
        let parts = vec![cat.slice(0, 1), cat.slice(1, 1), cat.slice(1, 3)];
        let merged = Catalog::concat(&parts).unwrap();
        assert_eq!(merged, cat);
    }

    #[test]
    fn test_concat_promotes_types() {
        let mut a = Catalog::new();
        a.add_column("v", ColumnData::Int(vec![1])).unwrap();
        let mut b = Catalog::new();
        b.add_column("v", ColumnData::Float(vec![2.5])).unwrap();
        let merged = Catalog::concat(&[a, b]).unwrap();
        assert_eq!(merged.column("v").unwrap().data, ColumnData::Float(vec![1.0, 2.5]));
    }

    #[test]
    fn test_rename_and_drop() {
        let mut cat = sample();
        cat.rename_column("x", "redshift").unwrap();
        assert!(cat.has_column("redshift"));
        assert!(!cat.has_column("x"));
        assert!(cat.drop_column("idx").is_some());
        assert!(cat.drop_column("idx").is_none());
        assert!(cat.floats("name").is_err());
    }

    #[test]
    fn test_metadata() {
        let mut cat = Catalog::new();
        cat.set_metadata("NEMOVER", "0.1");
        cat.set_metadata("NEMOVER", "0.2");
        assert_eq!(cat.get_metadata("NEMOVER"), Some("0.2"));
        assert_eq!(cat.metadata().len(), 1);
    }
}
