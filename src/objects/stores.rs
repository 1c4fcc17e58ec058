//! Built-in [`ObjectStore`] strategies

use super::{npy, NdArray, Object, ObjectStore};
use crate::storage::NumArray;
use crate::{Error, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

fn wrong_kind(store: &str, object: &Object) -> Error {
    Error::StorageError(format!(
        "{store} store cannot write objects of kind {:?}",
        object.kind()
    ))
}

/// Dense arrays as NumPy `.npy` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumpyStore;

impl ObjectStore for NumpyStore {
    fn name(&self) -> &'static str {
        "numpy"
    }

    fn suffix(&self) -> &'static str {
        "npy"
    }

    fn save(&self, object: &Object, path: &Path) -> Result<()> {
        let Object::Array(array) = object else {
            return Err(wrong_kind(self.name(), object));
        };
        fs::write(path, npy::encode(array))?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Object> {
        Ok(Object::Array(npy::decode(&fs::read(path)?)?))
    }
}

/// Arrow tables as Parquet files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetStore;

impl ObjectStore for ParquetStore {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn suffix(&self) -> &'static str {
        "parquet"
    }

    fn save(&self, object: &Object, path: &Path) -> Result<()> {
        let Object::Table(batch) = object else {
            return Err(wrong_kind(self.name(), object));
        };
        let mut writer = ArrowWriter::try_new(File::create(path)?, batch.schema(), None)?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Object> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
        let schema = builder.schema().clone();
        let batches = builder
            .build()?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Object::Table(arrow::compute::concat_batches(
            &schema, &batches,
        )?))
    }
}

/// Labelled N-d arrays as JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabeledArrayStore;

impl ObjectStore for LabeledArrayStore {
    fn name(&self) -> &'static str {
        "labeled-array"
    }

    fn suffix(&self) -> &'static str {
        "json"
    }

    fn save(&self, object: &Object, path: &Path) -> Result<()> {
        let Object::NdArray(array) = object else {
            return Err(wrong_kind(self.name(), object));
        };
        fs::write(path, serde_json::to_vec(array)?)?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Object> {
        let array: NdArray = serde_json::from_slice(&fs::read(path)?)?;
        // re-validate the shape of hand-edited files
        let array = NdArray::new(array.dims, array.shape, array.data)?;
        Ok(Object::NdArray(array))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
enum Envelope {
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Array(NumArray),
    NdArray(NdArray),
}

/// Fallback for kinds without a dedicated strategy: a self-describing JSON
/// envelope. Tables are not representable and must use [`ParquetStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueStore;

impl ObjectStore for OpaqueStore {
    fn name(&self) -> &'static str {
        "opaque"
    }

    fn suffix(&self) -> &'static str {
        "bin"
    }

    fn save(&self, object: &Object, path: &Path) -> Result<()> {
        let envelope = match object {
            Object::Bytes(bytes) => Envelope::Bytes(bytes.clone()),
            Object::Json(value) => Envelope::Json(value.clone()),
            Object::Array(array) => Envelope::Array(array.clone()),
            Object::NdArray(array) => Envelope::NdArray(array.clone()),
            Object::Table(_) => return Err(wrong_kind(self.name(), object)),
        };
        fs::write(path, serde_json::to_vec(&envelope)?)?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Object> {
        let envelope: Envelope = serde_json::from_slice(&fs::read(path)?)?;
        Ok(match envelope {
            Envelope::Bytes(bytes) => Object::Bytes(bytes),
            Envelope::Json(value) => Object::Json(value),
            Envelope::Array(array) => Object::Array(array),
            Envelope::NdArray(array) => Object::NdArray(array),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategies_reject_other_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        let bytes = Object::Bytes(vec![1]);

        assert!(NumpyStore.save(&bytes, &path).is_err());
        assert!(ParquetStore.save(&bytes, &path).is_err());
        assert!(LabeledArrayStore.save(&bytes, &path).is_err());
    }

    #[test]
    fn test_opaque_rejects_tables() {
        use arrow::array::{Int32Array, RecordBatch};
        use arrow::datatypes::{DataType, Field, Schema};
        use std::sync::Arc;

        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1]))]).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let result = OpaqueStore.save(&Object::Table(batch), &dir.path().join("t.bin"));
        assert!(result.is_err());
    }

    #[test]
    fn test_labeled_store_validates_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"dims":["a"],"shape":[3],"data":[1.0]}"#).unwrap();
        assert!(LabeledArrayStore.load(&path).is_err());
    }
}
