//! Arrow/Parquet conversion for [`RecordStore`]
//!
//! Homogeneous columns map onto native Arrow types. Columns mixing value
//! kinds (e.g. floats plus the `"ERROR"` sentinel) are written as UTF-8 with
//! one JSON-encoded [`Value`] per cell, so a store reloads exactly as written.
//! The encoding of every column is recorded both in the field metadata and in
//! the Parquet key-value metadata.

use super::{Column, RecordStore, Value};
use crate::{Error, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int64Array, RecordBatch,
    RecordBatchOptions, StringArray,
};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Field metadata key holding the cell encoding of a column
pub const ENCODING_METADATA_KEY: &str = "experiment_ledger.encoding";

/// Parquet key-value metadata entry holding all column encodings
const FILE_ENCODINGS_KEY: &str = "experiment_ledger.encodings";

/// Positional index column written to Parquet (stripped on load)
const ROW_INDEX_COLUMN: &str = "__row__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CellEncoding {
    Float,
    Int,
    Bool,
    Text,
    Reference,
    Json,
}

impl CellEncoding {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Missing => None,
            Value::Float(_) => Some(Self::Float),
            Value::Int(_) => Some(Self::Int),
            Value::Bool(_) => Some(Self::Bool),
            Value::Text(_) => Some(Self::Text),
            Value::Reference(_) => Some(Self::Reference),
        }
    }

    fn infer(values: &[Value]) -> Self {
        let mut kinds = values.iter().filter_map(Self::of);
        let Some(first) = kinds.next() else {
            return Self::Float;
        };
        if kinds.all(|kind| kind == first) {
            first
        } else {
            Self::Json
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Text => "text",
            Self::Reference => "reference",
            Self::Json => "json",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "float" => Some(Self::Float),
            "int" => Some(Self::Int),
            "bool" => Some(Self::Bool),
            "text" => Some(Self::Text),
            "reference" => Some(Self::Reference),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

fn encode_column(values: &[Value], encoding: CellEncoding) -> Result<(DataType, ArrayRef)> {
    let encoded: (DataType, ArrayRef) = match encoding {
        CellEncoding::Float => (
            DataType::Float64,
            Arc::new(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Float(x) => Some(*x),
                        _ => None,
                    })
                    .collect::<Float64Array>(),
            ),
        ),
        CellEncoding::Int => (
            DataType::Int64,
            Arc::new(values.iter().map(Value::as_i64).collect::<Int64Array>()),
        ),
        CellEncoding::Bool => (
            DataType::Boolean,
            Arc::new(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<BooleanArray>(),
            ),
        ),
        CellEncoding::Text => (
            DataType::Utf8,
            Arc::new(values.iter().map(Value::as_str).collect::<StringArray>()),
        ),
        CellEncoding::Reference => (
            DataType::Utf8,
            Arc::new(
                values
                    .iter()
                    .map(|v| v.as_reference().map(|p| p.to_string_lossy().into_owned()))
                    .collect::<StringArray>(),
            ),
        ),
        CellEncoding::Json => {
            let cells = values
                .iter()
                .map(|v| {
                    if v.is_missing() {
                        Ok(None)
                    } else {
                        serde_json::to_string(v).map(Some)
                    }
                })
                .collect::<std::result::Result<Vec<Option<String>>, _>>()?;
            (DataType::Utf8, Arc::new(StringArray::from(cells)))
        }
    };
    Ok(encoded)
}

fn downcast<'a, T: 'static>(array: &'a dyn Array, name: &str) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::StorageError(format!(
            "Failed to downcast column '{name}' of type {:?}",
            array.data_type()
        ))
    })
}

fn decode_column(array: &ArrayRef, encoding: Option<CellEncoding>, name: &str) -> Result<Vec<Value>> {
    let len = array.len();
    let values: Vec<Value> = match array.data_type() {
        DataType::Float64 => {
            let array = downcast::<Float64Array>(array.as_ref(), name)?;
            (0..len)
                .map(|i| if array.is_null(i) { Value::Missing } else { Value::Float(array.value(i)) })
                .collect()
        }
        DataType::Float32 => {
            let array = downcast::<Float32Array>(array.as_ref(), name)?;
            (0..len)
                .map(|i| {
                    if array.is_null(i) {
                        Value::Missing
                    } else {
                        Value::Float(f64::from(array.value(i)))
                    }
                })
                .collect()
        }
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let widened = cast(array, &DataType::Int64)?;
            let array = downcast::<Int64Array>(widened.as_ref(), name)?;
            (0..len)
                .map(|i| if array.is_null(i) { Value::Missing } else { Value::Int(array.value(i)) })
                .collect()
        }
        DataType::Boolean => {
            let array = downcast::<BooleanArray>(array.as_ref(), name)?;
            (0..len)
                .map(|i| if array.is_null(i) { Value::Missing } else { Value::Bool(array.value(i)) })
                .collect()
        }
        DataType::Utf8 | DataType::LargeUtf8 => {
            let utf8 = cast(array, &DataType::Utf8)?;
            let array = downcast::<StringArray>(utf8.as_ref(), name)?;
            (0..len)
                .map(|i| {
                    if array.is_null(i) {
                        return Ok(Value::Missing);
                    }
                    let cell = array.value(i);
                    Ok(match encoding {
                        Some(CellEncoding::Json) => serde_json::from_str(cell)?,
                        Some(CellEncoding::Reference) => Value::Reference(PathBuf::from(cell)),
                        _ => Value::Text(cell.to_string()),
                    })
                })
                .collect::<Result<Vec<_>>>()?
        }
        dt => {
            return Err(Error::UnsupportedType(format!(
                "column '{name}' has unsupported Arrow type {dt:?}"
            )))
        }
    };
    Ok(values)
}

impl RecordStore {
    /// Export the store as an Arrow record batch.
    ///
    /// Every field is nullable (unset cells are nulls) and carries its cell
    /// encoding under [`ENCODING_METADATA_KEY`].
    ///
    /// # Errors
    ///
    /// Returns error if a JSON-encoded cell fails to serialize
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays = Vec::with_capacity(self.columns.len());

        for column in &self.columns {
            let encoding = CellEncoding::infer(&column.values);
            let (data_type, array) = encode_column(&column.values, encoding)?;
            fields.push(
                Field::new(&column.name, data_type, true).with_metadata(HashMap::from([(
                    ENCODING_METADATA_KEY.to_string(),
                    encoding.as_str().to_string(),
                )])),
            );
            arrays.push(array);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(self.len));
        Ok(RecordBatch::try_new_with_options(
            Arc::new(Schema::new(fields)),
            arrays,
            &options,
        )?)
    }

    /// Import an Arrow record batch.
    ///
    /// Integer columns become `Int`, float columns `Float`, booleans `Bool`
    /// and strings `Text` (or `Reference`/JSON cells when the field metadata
    /// says so). Nulls become `Missing`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType` for nested, temporal or binary columns
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        Self::from_batch_with_encodings(batch, &HashMap::new())
    }

    fn from_batch_with_encodings(
        batch: &RecordBatch,
        overrides: &HashMap<String, CellEncoding>,
    ) -> Result<Self> {
        let schema = batch.schema();
        let mut columns = Vec::with_capacity(batch.num_columns());

        for (field, array) in schema.fields().iter().zip(batch.columns()) {
            if field.name() == ROW_INDEX_COLUMN {
                continue;
            }
            let encoding = overrides.get(field.name()).copied().or_else(|| {
                field
                    .metadata()
                    .get(ENCODING_METADATA_KEY)
                    .and_then(|tag| CellEncoding::parse(tag))
            });
            columns.push(Column {
                name: field.name().clone(),
                values: decode_column(array, encoding, field.name())?,
            });
        }

        Ok(Self {
            columns,
            len: batch.num_rows(),
        })
    }

    /// Write the store to a Parquet file.
    ///
    /// A positional index column is prepended so stores without columns keep
    /// their row count. The file is written next to `path` and renamed into
    /// place.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let batch = self.to_record_batch()?;

        let mut fields = vec![Arc::new(Field::new(ROW_INDEX_COLUMN, DataType::Int64, false))];
        fields.extend(batch.schema().fields().iter().cloned());
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(Int64Array::from_iter_values(
            (0..self.len).map(|i| i64::try_from(i).unwrap_or(i64::MAX)),
        ))];
        arrays.extend(batch.columns().iter().cloned());
        let indexed = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;

        let encodings: HashMap<&str, CellEncoding> = self
            .columns
            .iter()
            .map(|c| (c.name.as_str(), CellEncoding::infer(&c.values)))
            .collect();
        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(vec![KeyValue::new(
                FILE_ENCODINGS_KEY.to_string(),
                serde_json::to_string(&encodings)?,
            )]))
            .build();

        let tmp = path.with_extension("parquet.tmp");
        let file = File::create(&tmp).map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet file {}: {e}", tmp.display()))
        })?;
        let mut writer = ArrowWriter::try_new(file, indexed.schema(), Some(props))?;
        writer.write(&indexed)?;
        writer.close()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a store previously written by [`RecordStore::store`] (or any
    /// Parquet file with supported column types).
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            Error::StorageError(format!("Failed to open Parquet file: {e}"))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::StorageError(format!("Failed to parse Parquet file: {e}"))
        })?;

        let encodings: HashMap<String, CellEncoding> = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|entries| entries.iter().find(|kv| kv.key == FILE_ENCODINGS_KEY))
            .and_then(|kv| kv.value.as_deref())
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet reader: {e}"))
        })?;

        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch.map_err(|e| {
                Error::StorageError(format!("Failed to read record batch: {e}"))
            })?);
        }

        let batch = concat_batches(&schema, &batches)?;
        Self::from_batch_with_encodings(&batch, &encodings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Date32Array, Int32Array};

    fn mixed_store() -> RecordStore {
        RecordStore::from_columns(vec![
            ("x", vec![Value::from(0.5), Value::from(1.5), Value::Missing]),
            ("n", vec![Value::from(1_i64), Value::from(2_i64), Value::from(3_i64)]),
            ("flag", vec![Value::from(true), Value::Missing, Value::from(false)]),
            ("cat", vec![Value::from("a"), Value::from("b"), Value::from("c")]),
            (
                "y",
                vec![Value::from(0.25), Value::error_sentinel(), Value::Missing],
            ),
            (
                "field",
                vec![
                    Value::Reference(PathBuf::from("field/0.npy")),
                    Value::Missing,
                    Value::Reference(PathBuf::from("field/2.npy")),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_record_batch_round_trip() {
        let store = mixed_store();
        let batch = store.to_record_batch().unwrap();

        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Float64);
        assert_eq!(batch.schema().field(4).data_type(), &DataType::Utf8);

        let back = RecordStore::from_record_batch(&batch).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn test_parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.parquet");
        let store = mixed_store();

        store.store(&path).unwrap();
        let loaded = RecordStore::load(&path).unwrap();

        assert_eq!(loaded, store);
    }

    #[test]
    fn test_non_finite_floats_next_to_error_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diverged.parquet");
        let store = RecordStore::from_columns(vec![
            (
                "y",
                vec![
                    Value::Float(f64::NAN),
                    Value::error_sentinel(),
                    Value::Float(f64::INFINITY),
                    Value::Float(f64::NEG_INFINITY),
                ],
            ),
            ("z", vec![Value::Float(f64::NAN); 4]),
        ])
        .unwrap();

        store.store(&path).unwrap();
        let loaded = RecordStore::load(&path).unwrap();

        assert_eq!(loaded, store);
        assert!(matches!(loaded.get(0, "y").unwrap(), Value::Float(v) if v.is_nan()));
    }

    #[test]
    fn test_parquet_keeps_row_count_without_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let store = RecordStore::with_empty_rows(4);

        store.store(&path).unwrap();
        let loaded = RecordStore::load(&path).unwrap();

        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.num_columns(), 0);
    }

    #[test]
    fn test_plain_arrow_types_import() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap();

        let store = RecordStore::from_record_batch(&batch).unwrap();
        assert_eq!(store.get(1, "id").unwrap(), &Value::Int(2));
        assert_eq!(store.get(1, "name").unwrap(), &Value::Missing);
    }

    #[test]
    fn test_unsupported_arrow_type_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("day", DataType::Date32, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Date32Array::from(vec![1, 2]))]).unwrap();

        let result = RecordStore::from_record_batch(&batch);
        assert!(matches!(result, Err(Error::UnsupportedType(_))));
    }
}
