//! Object store registry for results that do not fit in a ledger cell
//!
//! Every [`Object`] has an [`ObjectKind`]. The [`StoreRegistry`] maps kinds
//! to an [`ObjectStore`] strategy; kinds without a registered strategy fall
//! back to the opaque strategy.
//!
//! | kind      | strategy              | suffix     |
//! |-----------|-----------------------|------------|
//! | `Array`   | [`NumpyStore`]        | `.npy`     |
//! | `Table`   | [`ParquetStore`]      | `.parquet` |
//! | `NdArray` | [`LabeledArrayStore`] | `.json`    |
//! | other     | [`OpaqueStore`]       | `.bin`     |
//!
//! # Example
//!
//! ```rust
//! use experiment_ledger::objects::{Object, StoreRegistry};
//! use experiment_ledger::storage::NumArray;
//!
//! # fn main() -> experiment_ledger::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let registry = StoreRegistry::default();
//! let field = Object::Array(NumArray::column_vector(vec![1.0, 2.0]));
//!
//! let written = registry.save(&field, &dir.path().join("field"))?;
//! assert_eq!(written.extension().unwrap(), "npy");
//! assert_eq!(registry.load(&written, None)?, field);
//! # Ok(())
//! # }
//! ```

mod npy;
mod stores;

pub use stores::{LabeledArrayStore, NumpyStore, OpaqueStore, ParquetStore};

use crate::storage::NumArray;
use crate::{Error, Result};
use arrow::array::RecordBatch;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Labelled N-dimensional array of `f64` (row-major).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    dims: Vec<String>,
    shape: Vec<usize>,
    #[serde(with = "crate::storage::nonfinite::seq")]
    data: Vec<f64>,
}

impl NdArray {
    /// Create an N-d array.
    ///
    /// # Errors
    ///
    /// Returns error if `dims` and `shape` differ in length or the data size
    /// does not match the shape
    pub fn new(dims: Vec<String>, shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        if dims.len() != shape.len() {
            return Err(Error::UnsupportedType(format!(
                "{} dimension names for a {}-d shape",
                dims.len(),
                shape.len()
            )));
        }
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::UnsupportedType(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { dims, shape, data })
    }

    /// Dimension names.
    #[must_use]
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    /// Extent of every dimension.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major data.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }
}

/// A result value that is stored in an auxiliary file.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Raw byte blob
    Bytes(Vec<u8>),
    /// Arbitrary JSON document
    Json(serde_json::Value),
    /// Dense 2-D array
    Array(NumArray),
    /// Arrow table
    Table(RecordBatch),
    /// Labelled N-d array
    NdArray(NdArray),
}

impl Object {
    /// Kind used to pick a storage strategy.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Self::Bytes(_) => ObjectKind::Bytes,
            Self::Json(_) => ObjectKind::Json,
            Self::Array(_) => ObjectKind::Array,
            Self::Table(_) => ObjectKind::Table,
            Self::NdArray(_) => ObjectKind::NdArray,
        }
    }
}

/// Type descriptor of an [`Object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// [`Object::Bytes`]
    Bytes,
    /// [`Object::Json`]
    Json,
    /// [`Object::Array`]
    Array,
    /// [`Object::Table`]
    Table,
    /// [`Object::NdArray`]
    NdArray,
}

/// Serialization strategy for objects written next to a ledger.
pub trait ObjectStore: Send + Sync {
    /// Strategy name for diagnostics.
    fn name(&self) -> &'static str;

    /// File suffix without the dot.
    fn suffix(&self) -> &'static str;

    /// Write `object` to `path` (suffix already applied).
    fn save(&self, object: &Object, path: &Path) -> Result<()>;

    /// Read an object from `path` (suffix already applied).
    fn load(&self, path: &Path) -> Result<Object>;
}

/// Append `.suffix` without replacing an existing extension.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

/// Kind → strategy table with an opaque fallback.
#[derive(Clone)]
pub struct StoreRegistry {
    by_kind: FxHashMap<ObjectKind, Arc<dyn ObjectStore>>,
    fallback: Arc<dyn ObjectStore>,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ObjectKind::Array, Arc::new(NumpyStore));
        registry.register(ObjectKind::Table, Arc::new(ParquetStore));
        registry.register(ObjectKind::NdArray, Arc::new(LabeledArrayStore));
        registry
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<String> = self
            .by_kind
            .iter()
            .map(|(kind, store)| format!("{kind:?}={}", store.name()))
            .collect();
        entries.sort();
        f.debug_struct("StoreRegistry")
            .field("by_kind", &entries)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl StoreRegistry {
    /// Registry with only the opaque fallback.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_kind: FxHashMap::default(),
            fallback: Arc::new(OpaqueStore),
        }
    }

    /// Register (or replace) the strategy for a kind.
    pub fn register(&mut self, kind: ObjectKind, store: Arc<dyn ObjectStore>) {
        self.by_kind.insert(kind, store);
    }

    /// Strategy for a kind, falling back to the opaque strategy.
    #[must_use]
    pub fn strategy_for(&self, kind: ObjectKind) -> &dyn ObjectStore {
        match self.by_kind.get(&kind) {
            Some(store) => &**store,
            None => {
                debug!(
                    ?kind,
                    fallback = self.fallback.name(),
                    "Object kind is not natively supported, using fallback store"
                );
                &*self.fallback
            }
        }
    }

    /// Strategy whose suffix matches the extension of `path`, falling back to
    /// the opaque strategy.
    #[must_use]
    pub fn strategy_for_path(&self, path: &Path) -> &dyn ObjectStore {
        let extension = path.extension().and_then(|e| e.to_str());
        extension
            .and_then(|ext| {
                self.by_kind
                    .values()
                    .find(|store| store.suffix() == ext)
                    .map(|store| &**store)
            })
            .unwrap_or_else(|| &*self.fallback)
    }

    /// Save `object` at `base` + the strategy's suffix, creating parent
    /// directories. Returns the written path.
    ///
    /// # Errors
    ///
    /// Returns error if the strategy fails to write
    pub fn save(&self, object: &Object, base: &Path) -> Result<PathBuf> {
        let store = self.strategy_for(object.kind());
        let path = with_suffix(base, store.suffix());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        store.save(object, &path)?;
        debug!(path = %path.display(), store = store.name(), "Stored object");
        Ok(path)
    }

    /// Load the object at `path`, with an explicit strategy or one inferred
    /// from the extension.
    ///
    /// # Errors
    ///
    /// Returns `MissingResultFile` if `path` does not exist, or the
    /// strategy's error if it cannot be decoded
    pub fn load(&self, path: &Path, expected: Option<&dyn ObjectStore>) -> Result<Object> {
        if !path.exists() {
            return Err(Error::MissingResultFile(path.to_path_buf()));
        }
        let store = expected.unwrap_or_else(|| self.strategy_for_path(path));
        store.load(path)
    }
}
