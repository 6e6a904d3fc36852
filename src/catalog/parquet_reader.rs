//! # Parquet catalog ingestion
//!
//! Read-only path for catalogs stored as **Apache Parquet** (large mock truth tables are usually
//! distributed this way). Every leaf column of a supported type is materialised:
//!
//! | Arrow type                     | Catalog column            | Nulls   |
//! |--------------------------------|---------------------------|---------|
//! | `Float64`, `Float32`           | [`ColumnData::Float`]     | `NaN`   |
//! | `Int64`, `Int32`               | [`ColumnData::Float`]     | `NaN`   |
//! | `Utf8`, `LargeUtf8`            | [`ColumnData::Text`]      | `""`    |
//!
//! Columns of other types are skipped with a warning. Typed arrays are downcast once per
//! record batch, never per row.
use std::fs::File;

use arrow_array::{
    Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array, LargeStringArray,
    StringArray,
};
use camino::Utf8Path;
use log::{debug, warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;

use crate::catalog::{Catalog, ColumnData};
use crate::nemo_errors::NemoError;

const BATCH_SIZE: usize = 8192;

/// Append the values of `array` to `out`; `false` when the Arrow type is unsupported.
fn append_array(array: &ArrayRef, out: &mut ColumnData) -> bool {
    macro_rules! push_numeric {
        ($arr:ty) => {
            if let Some(a) = array.as_any().downcast_ref::<$arr>() {
                let ColumnData::Float(v) = out else {
                    return false;
                };
                v.extend((0..a.len()).map(|i| {
                    if a.is_null(i) {
                        f64::NAN
                    } else {
                        a.value(i) as f64
                    }
                }));
                return true;
            }
        };
    }
    macro_rules! push_text {
        ($arr:ty) => {
            if let Some(a) = array.as_any().downcast_ref::<$arr>() {
                let ColumnData::Text(v) = out else {
                    return false;
                };
                v.extend((0..a.len()).map(|i| {
                    if a.is_null(i) {
                        String::new()
                    } else {
                        a.value(i).to_string()
                    }
                }));
                return true;
            }
        };
    }

    push_numeric!(Float64Array);
    push_numeric!(Float32Array);
    push_numeric!(Int64Array);
    push_numeric!(Int32Array);
    push_text!(StringArray);
    push_text!(LargeStringArray);
    false
}

fn empty_for(array: &ArrayRef) -> Option<ColumnData> {
    let any = array.as_any();
    if any.is::<Float64Array>()
        || any.is::<Float32Array>()
        || any.is::<Int64Array>()
        || any.is::<Int32Array>()
    {
        Some(ColumnData::Float(Vec::new()))
    } else if any.is::<StringArray>() || any.is::<LargeStringArray>() {
        Some(ColumnData::Text(Vec::new()))
    } else {
        None
    }
}

/// Load a Parquet file into a [`Catalog`].
///
/// Return
/// ----------
/// * The catalog, or a [`NemoError::Io`] / [`NemoError::Parquet`] on I/O or decoding failure.
pub fn read_parquet(path: &Utf8Path) -> Result<Catalog, NemoError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(BATCH_SIZE)
        .build()?;

    // (name, data) in file order; None for skipped columns
    let mut columns: Vec<(String, Option<ColumnData>)> = Vec::new();

    for maybe_batch in reader {
        let batch = maybe_batch.map_err(ParquetError::from)?;
        let schema = batch.schema();

        if columns.is_empty() {
            for (field, array) in schema.fields().iter().zip(batch.columns()) {
                let data = empty_for(array);
                if data.is_none() {
                    warn!(
                        "Skipping Parquet column '{}' of unsupported type {}",
                        field.name(),
                        field.data_type()
                    );
                }
                columns.push((field.name().to_string(), data));
            }
        }

        for ((name, data), array) in columns.iter_mut().zip(batch.columns()) {
            if let Some(out) = data {
                if !append_array(array, out) {
                    return Err(NemoError::Arrow(format!(
                        "column '{name}' changed type between record batches"
                    )));
                }
            }
        }
    }

    let mut catalog = Catalog::new();
    for (name, data) in columns {
        if let Some(data) = data {
            catalog.add_column(&name, data)?;
        }
    }
    debug!("Read {path}: {catalog}");
    Ok(catalog)
}

#[cfg(test)]
mod parquet_reader_test {
    use super::*;
    use arrow_array::RecordBatch;
    use camino::Utf8PathBuf;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    #[test]
    fn test_read_mixed_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("mock.parquet")).unwrap();

        let batch = RecordBatch::try_from_iter(vec![
            (
                "RADeg",
                Arc::new(Float64Array::from(vec![Some(1.0), None])) as ArrayRef,
            ),
            (
                "snr",
                Arc::new(Float32Array::from(vec![4.5_f32, 6.0])) as ArrayRef,
            ),
            ("id", Arc::new(Int32Array::from(vec![7, 8])) as ArrayRef),
            (
                "name",
                Arc::new(StringArray::from(vec![Some("A"), None])) as ArrayRef,
            ),
        ])
        .unwrap();

        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let cat = read_parquet(&path).unwrap();
        assert_eq!(cat.len(), 2);
        let ra = cat.floats("RADeg").unwrap();
        assert_eq!(ra[0], 1.0);
        assert!(ra[1].is_nan());
        assert_eq!(cat.floats("snr").unwrap(), vec![4.5, 6.0]);
        assert_eq!(cat.floats("id").unwrap(), vec![7.0, 8.0]);
        assert_eq!(cat.texts("name").unwrap(), vec!["A", ""]);
    }
}
