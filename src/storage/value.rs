//! Cell values held by a record store

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Text written into every output cell of a row whose evaluation failed.
pub const ERROR_SENTINEL: &str = "ERROR";

/// A single cell of a record store.
///
/// Cells are unset (`Missing`) until a job finishes. Results that do not fit
/// inline are written to an auxiliary file and the cell holds a `Reference`
/// to it, relative to the ledger directory.
///
/// Two `Float(NaN)` cells compare equal, so a reloaded store equals the one
/// that was written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    /// Unset cell (NaN-equivalent)
    #[default]
    Missing,
    /// 64-bit float
    Float(#[serde(with = "crate::storage::nonfinite")] f64),
    /// 64-bit signed integer
    Int(i64),
    /// Boolean flag
    Bool(bool),
    /// Free text (also used for categorical parameters)
    Text(String),
    /// Path of an externally stored object
    Reference(PathBuf),
}

impl Value {
    /// The `"ERROR"` sentinel written on failed rows.
    #[must_use]
    pub fn error_sentinel() -> Self {
        Self::Text(ERROR_SENTINEL.to_string())
    }

    /// Check if the cell is unset.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Check if the cell holds the error sentinel.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Text(text) if text == ERROR_SENTINEL)
    }

    /// Numeric view of the cell (floats, integers and booleans).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integer view of the cell.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the cell.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Reference view of the cell.
    #[must_use]
    pub fn as_reference(&self) -> Option<&Path> {
        match self {
            Self::Reference(path) => Some(path),
            _ => None,
        }
    }

    /// Short name of the variant, used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Text(_) => "text",
            Self::Reference(_) => "reference",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Missing, Self::Missing) => true,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Reference(a), Self::Reference(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "NaN"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Reference(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Missing, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_sentinel() {
        let value = Value::error_sentinel();
        assert!(value.is_error());
        assert!(!Value::from("error").is_error());
        assert_eq!(value.to_string(), "ERROR");
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::from(2_i64).as_f64(), Some(2.0));
        assert_eq!(Value::from(true).as_f64(), Some(1.0));
        assert_eq!(Value::from("x").as_f64(), None);
        assert_eq!(Value::Missing.as_f64(), None);
    }

    #[test]
    fn test_nan_cells_compare_equal() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(f64::NAN), Value::Missing);
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Float(1.0), Value::Int(1));
    }

    #[test]
    fn test_non_finite_json_round_trip() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 2.5] {
            let cell = Value::Float(value);
            let json = serde_json::to_string(&cell).unwrap();
            assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), cell);
        }
        assert_eq!(serde_json::to_string(&Value::Float(f64::NAN)).unwrap(), r#"{"Float":"NaN"}"#);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<f64>), Value::Missing);
        assert_eq!(Value::from(Some(1.5)), Value::Float(1.5));
    }
}
