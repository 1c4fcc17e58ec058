//! Columnar record store (inputs or outputs of a ledger)
//!
//! A [`RecordStore`] is an ordered set of named columns of equal length.
//! Rows are addressed by position; removing rows re-packs the remaining ones
//! so positions stay contiguous from 0.
//!
//! Persistence goes through Arrow/Parquet (see [`RecordStore::store`]).

mod array;
mod arrow_io;
pub(crate) mod nonfinite;
mod value;

pub use array::NumArray;
pub use value::{Value, ERROR_SENTINEL};

use crate::topk::select_n_smallest;
use crate::{Error, Result};
use std::ops::Range;

/// One row materialized as ordered `(column, value)` pairs.
pub type Row = Vec<(String, Value)>;

#[derive(Debug, Clone, PartialEq)]
struct Column {
    name: String,
    values: Vec<Value>,
}

/// Columnar table of [`Value`]s.
///
/// Column names are unique and keep insertion order. The row count is tracked
/// separately so a store without columns (e.g. outputs before the first
/// result arrives) still has a length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    columns: Vec<Column>,
    len: usize,
}

impl RecordStore {
    /// Create an empty store without columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with `len` rows and no columns.
    #[must_use]
    pub fn with_empty_rows(len: usize) -> Self {
        Self {
            columns: Vec::new(),
            len,
        }
    }

    /// Build a store from `(name, values)` pairs.
    ///
    /// # Errors
    ///
    /// Returns error if columns differ in length or a name repeats
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<Value>)>) -> Result<Self> {
        let mut store = Self::new();
        let len = columns.first().map_or(0, |(_, values)| values.len());
        for (name, values) in columns {
            let name = name.into();
            if values.len() != len {
                return Err(Error::SchemaMismatch(format!(
                    "column '{name}' has {} rows, expected {len}",
                    values.len()
                )));
            }
            if store.has_column(&name) {
                return Err(Error::SchemaMismatch(format!("duplicate column '{name}'")));
            }
            store.columns.push(Column { name, values });
        }
        store.len = len;
        Ok(store)
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the store has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Column names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Check if a column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Borrow a column.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if the column is absent
    pub fn column(&self, name: &str) -> Result<&[Value]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    pub(crate) fn column_mut(&mut self, name: &str) -> Result<&mut Vec<Value>> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.values)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Add a column filled with `Missing`. No-op if it already exists.
    pub fn add_column(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.has_column(&name) {
            self.columns.push(Column {
                name,
                values: vec![Value::Missing; self.len],
            });
        }
    }

    /// Append the rows of `other`, aligning columns by name.
    ///
    /// Columns only present in `other` are added (earlier rows get
    /// `Missing`); columns absent from `other` are filled with `Missing`.
    pub fn add(&mut self, other: &Self) {
        for column in &other.columns {
            self.add_column(column.name.clone());
        }
        for column in &mut self.columns {
            match other.columns.iter().find(|c| c.name == column.name) {
                Some(source) => column.values.extend(source.values.iter().cloned()),
                None => column
                    .values
                    .extend(std::iter::repeat(Value::Missing).take(other.len)),
            }
        }
        self.len += other.len;
    }

    /// Append `n` rows with every column unset.
    pub fn add_empty_rows(&mut self, n: usize) {
        for column in &mut self.columns {
            column
                .values
                .extend(std::iter::repeat(Value::Missing).take(n));
        }
        self.len += n;
    }

    /// Row-wise concatenation (`self` rows first) with union-of-columns.
    #[must_use]
    pub fn combine_with(&self, other: &Self) -> Self {
        let mut combined = self.clone();
        combined.add(other);
        combined
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.len {
            Ok(())
        } else {
            Err(Error::IndexOutOfBounds {
                index,
                len: self.len,
            })
        }
    }

    /// Drop the rows at `indices`; remaining rows are re-packed from 0.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if any index is outside the store. Nothing
    /// is removed in that case.
    pub fn remove(&mut self, indices: &[usize]) -> Result<()> {
        let mut keep = vec![true; self.len];
        for &index in indices {
            self.check_index(index)?;
            keep[index] = false;
        }
        for column in &mut self.columns {
            let mut flags = keep.iter();
            column.values.retain(|_| *flags.next().unwrap_or(&true));
        }
        self.len = keep.iter().filter(|k| **k).count();
        Ok(())
    }

    /// New store holding the rows at `indices`, in that order.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if any index is outside the store
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        for &index in indices {
            self.check_index(index)?;
        }
        Ok(Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: indices.iter().map(|&i| c.values[i].clone()).collect(),
                })
                .collect(),
            len: indices.len(),
        })
    }

    /// New store holding the rows in `range`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the range exceeds the store
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.end > self.len || range.start > range.end {
            return Err(Error::IndexOutOfBounds {
                index: range.end,
                len: self.len,
            });
        }
        let indices: Vec<usize> = range.collect();
        self.select(&indices)
    }

    /// Read a single cell.
    ///
    /// # Errors
    ///
    /// Returns error if the column or row does not exist
    pub fn get(&self, index: usize, column: &str) -> Result<&Value> {
        self.check_index(index)?;
        Ok(&self.column(column)?[index])
    }

    /// Point update of one cell.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if the column is absent, `IndexOutOfBounds`
    /// if the row is outside the store
    pub fn set_data(&mut self, index: usize, value: Value, column: &str) -> Result<()> {
        self.check_index(index)?;
        self.column_mut(column)?[index] = value;
        Ok(())
    }

    /// Set every column of one row to `value`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the row is outside the store
    pub fn set_row(&mut self, index: usize, value: &Value) -> Result<()> {
        self.check_index(index)?;
        for column in &mut self.columns {
            column.values[index] = value.clone();
        }
        Ok(())
    }

    /// Materialize one row as ordered `(column, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the row is outside the store
    pub fn get_data_dict(&self, index: usize) -> Result<Row> {
        self.check_index(index)?;
        Ok(self
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.values[index].clone()))
            .collect())
    }

    /// Indices of the `n` rows with the lowest sum over `columns`.
    ///
    /// Ties keep the original row order. Rows with a non-numeric cell in any
    /// of the columns (unset, error sentinel, references) rank last.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` if any column is absent
    pub fn n_best_samples(&self, n: usize, columns: &[&str]) -> Result<Vec<usize>> {
        let selected = columns
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<Vec<_>>>()?;

        let scores: Vec<Option<f64>> = (0..self.len)
            .map(|row| {
                selected
                    .iter()
                    .map(|values| values[row].as_f64())
                    .sum::<Option<f64>>()
            })
            .collect();

        Ok(select_n_smallest(&scores, n))
    }

    /// Dense numeric export; unset cells become `NaN`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if a cell is not numeric
    pub fn to_array(&self) -> Result<NumArray> {
        let cols = self.columns.len();
        let mut data = Vec::with_capacity(self.len * cols);
        for row in 0..self.len {
            for column in &self.columns {
                let value = &column.values[row];
                let number = match value {
                    Value::Missing => f64::NAN,
                    other => other.as_f64().ok_or_else(|| Error::TypeMismatch {
                        column: column.name.clone(),
                        message: format!("cannot convert {} value to f64", other.type_name()),
                    })?,
                };
                data.push(number);
            }
        }
        NumArray::new(self.len, cols, data)
    }

    /// Append the rows of a dense array.
    ///
    /// An empty store without columns takes `names` (or `x0, x1, ...` when
    /// `names` is empty); otherwise the array width must match the existing
    /// columns.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` on a width mismatch
    pub fn add_array(&mut self, array: &NumArray, names: &[String]) -> Result<()> {
        if self.columns.is_empty() {
            if !names.is_empty() && names.len() != array.cols() {
                return Err(Error::SchemaMismatch(format!(
                    "{} column names for an array with {} columns",
                    names.len(),
                    array.cols()
                )));
            }
            for col in 0..array.cols() {
                let name = names.get(col).cloned().unwrap_or_else(|| format!("x{col}"));
                self.add_column(name);
            }
        } else if self.columns.len() != array.cols() {
            return Err(Error::SchemaMismatch(format!(
                "array has {} columns, store has {}",
                array.cols(),
                self.columns.len()
            )));
        }

        for (col, column) in self.columns.iter_mut().enumerate() {
            column
                .values
                .extend((0..array.rows()).map(|row| Value::from(array.data()[row * array.cols() + col])));
        }
        self.len += array.rows();
        Ok(())
    }

    /// Fill unset cells of `column` with `values`, visiting only `rows`
    /// in the order given.
    ///
    /// The column is created if it does not exist. Returns the row indices
    /// that were filled; rows outside the store are skipped.
    pub fn fill_array(&mut self, values: &[f64], column: &str, rows: &[usize]) -> Vec<usize> {
        self.add_column(column);
        let mut filled = Vec::new();
        let mut source = values.iter();
        if let Ok(cells) = self.column_mut(column) {
            for &index in rows {
                let Some(cell) = cells.get_mut(index).filter(|c| c.is_missing()) else {
                    continue;
                };
                let Some(value) = source.next() else { break };
                *cell = Value::Float(*value);
                filled.push(index);
            }
        }
        filled
    }

    /// Set every unset cell of `rows` to `value`, in all columns.
    pub fn fill_missing(&mut self, rows: &[usize], value: &Value) {
        for column in &mut self.columns {
            for &index in rows {
                if let Some(cell) = column.values.get_mut(index).filter(|c| c.is_missing()) {
                    *cell = value.clone();
                }
            }
        }
    }
}
