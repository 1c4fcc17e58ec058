//! Input schema (domain) of an experiment ledger
//!
//! The domain is an ordered mapping from input column name to a
//! [`Parameter`]. The ledger only uses it to coerce column types after a bulk
//! append and to check that two ledgers may be combined.

use crate::storage::{RecordStore, Value};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const fn default_step() -> i64 {
    1
}

/// Specification of a single input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parameter {
    /// Real-valued parameter in `[lower_bound, upper_bound]`
    Continuous {
        /// Lower bound
        lower_bound: f64,
        /// Upper bound
        upper_bound: f64,
        /// Sample on a log scale
        #[serde(default)]
        log: bool,
    },
    /// Integer parameter in `[lower_bound, upper_bound]`
    Discrete {
        /// Lower bound
        lower_bound: i64,
        /// Upper bound
        upper_bound: i64,
        /// Step between admissible values
        #[serde(default = "default_step")]
        step: i64,
    },
    /// One of a fixed set of labels
    Categorical {
        /// Admissible labels
        categories: Vec<String>,
    },
    /// Fixed value
    Constant {
        /// The value
        value: Value,
    },
}

impl Parameter {
    /// Continuous parameter on a linear scale.
    #[must_use]
    pub const fn continuous(lower_bound: f64, upper_bound: f64) -> Self {
        Self::Continuous {
            lower_bound,
            upper_bound,
            log: false,
        }
    }

    /// Discrete parameter with unit step.
    #[must_use]
    pub const fn discrete(lower_bound: i64, upper_bound: i64) -> Self {
        Self::Discrete {
            lower_bound,
            upper_bound,
            step: 1,
        }
    }

    /// Categorical parameter.
    #[must_use]
    pub fn categorical<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Categorical {
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    /// Coerce a cell to the parameter's column type. Unset cells pass
    /// through.
    fn coerce(&self, column: &str, value: &Value) -> Result<Value> {
        if value.is_missing() {
            return Ok(Value::Missing);
        }
        let mismatch = |expected: &str| Error::TypeMismatch {
            column: column.to_string(),
            message: format!("expected {expected}, found {} value '{value}'", value.type_name()),
        };

        match self {
            Self::Continuous { .. } => value
                .as_f64()
                .filter(|_| !matches!(value, Value::Bool(_)))
                .map(Value::Float)
                .ok_or_else(|| mismatch("float")),
            Self::Discrete { .. } => match value {
                Value::Int(v) => Ok(Value::Int(*v)),
                #[allow(clippy::cast_possible_truncation)]
                Value::Float(v) if v.is_finite() && v.fract() == 0.0 => Ok(Value::Int(*v as i64)),
                _ => Err(mismatch("integer")),
            },
            Self::Categorical { .. } => match value {
                Value::Reference(_) => Err(mismatch("category label")),
                Value::Text(_) => Ok(value.clone()),
                other => Ok(Value::Text(other.to_string())),
            },
            Self::Constant { .. } => Ok(value.clone()),
        }
    }
}

/// Ordered mapping of input column names to parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    parameters: Vec<(String, Parameter)>,
}

impl Domain {
    /// Create an empty domain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a parameter, keeping insertion order.
    pub fn add(&mut self, name: impl Into<String>, parameter: Parameter) {
        let name = name.into();
        if let Some(entry) = self.parameters.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = parameter;
        } else {
            self.parameters.push((name, parameter));
        }
    }

    /// Builder-style [`Domain::add`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, parameter: Parameter) -> Self {
        self.add(name, parameter);
        self
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    /// Parameter names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Check if the domain has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Iterate over `(name, parameter)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.parameters.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Coerce the columns of `store` that the domain declares.
    ///
    /// Columns unknown to the domain are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if a value cannot be represented by its
    /// parameter type; the store is left unchanged in that case.
    pub fn coerce(&self, store: &mut RecordStore) -> Result<()> {
        let mut coerced = Vec::new();
        for (name, parameter) in &self.parameters {
            let Ok(values) = store.column(name) else {
                continue;
            };
            let values = values
                .iter()
                .map(|v| parameter.coerce(name, v))
                .collect::<Result<Vec<_>>>()?;
            coerced.push((name.as_str(), values));
        }
        for (name, values) in coerced {
            *store.column_mut(name)? = values;
        }
        Ok(())
    }

    /// Infer a domain from input data.
    ///
    /// Float columns become continuous over their observed range, integer
    /// columns discrete, anything else categorical over the observed labels.
    /// Columns without a single set value become unset constants.
    #[must_use]
    pub fn from_data(store: &RecordStore) -> Self {
        let mut domain = Self::new();
        for name in store.names() {
            let Ok(values) = store.column(name) else {
                continue;
            };
            domain.add(name, infer_parameter(values));
        }
        domain
    }

    /// Write the domain as JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a domain written by [`Domain::store`].
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn infer_parameter(values: &[Value]) -> Parameter {
    let set: Vec<&Value> = values.iter().filter(|v| !v.is_missing()).collect();
    if set.is_empty() {
        return Parameter::Constant {
            value: Value::Missing,
        };
    }

    if set.iter().all(|v| matches!(v, Value::Int(_))) {
        let ints = set.iter().filter_map(|v| v.as_i64());
        let lower = ints.clone().min().unwrap_or(0);
        let upper = ints.max().unwrap_or(0);
        return Parameter::discrete(lower, upper);
    }

    if set
        .iter()
        .all(|v| matches!(v, Value::Int(_) | Value::Float(_)))
    {
        let floats = set.iter().filter_map(|v| v.as_f64());
        let lower = floats.clone().fold(f64::INFINITY, f64::min);
        let upper = floats.fold(f64::NEG_INFINITY, f64::max);
        return Parameter::continuous(lower, upper);
    }

    let mut categories: Vec<String> = Vec::new();
    for value in set {
        let label = value.to_string();
        if !categories.contains(&label) {
            categories.push(label);
        }
    }
    Parameter::Categorical { categories }
}
