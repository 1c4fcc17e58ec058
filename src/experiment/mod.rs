//! Experiment ledger: inputs, outputs and job status of a design of
//! experiments
//!
//! ## Layout
//!
//! ```text
//! row │ input_data (RecordStore) │ output_data (RecordStore) │ jobs
//! ────┼──────────────────────────┼───────────────────────────┼────────────
//!  0  │ x0=0.1  x1=0.7           │ y=1.25                    │ FINISHED
//!  1  │ x0=0.4  x1=0.2           │ y=ERROR                   │ ERROR
//!  2  │ x0=0.9  x1=0.5           │ y=NaN                     │ IN_PROGRESS
//!  3  │ x0=0.3  x1=0.8           │ y=NaN                     │ OPEN
//! ```
//!
//! The three structures always have the same number of rows. Every
//! structural change goes through a `&mut self` method that touches all of
//! them.
//!
//! ## Usage
//!
//! ```rust
//! use experiment_ledger::domain::{Domain, Parameter};
//! use experiment_ledger::experiment::ExperimentData;
//! use experiment_ledger::storage::NumArray;
//!
//! # fn main() -> experiment_ledger::Result<()> {
//! let domain = Domain::new()
//!     .with("x0", Parameter::continuous(0.0, 1.0))
//!     .with("x1", Parameter::continuous(0.0, 1.0));
//! let mut data = ExperimentData::builder().domain(domain).build()?;
//! data.append_rows(NumArray::from_rows(vec![vec![0.1, 0.7], vec![0.4, 0.2]])?)?;
//!
//! let mut sample = data.claim_next_open_row()?;
//! let y: f64 = sample.input_vector().iter().sum();
//! sample.set_output("y", y);
//! data.commit_row(sample)?;
//!
//! assert_eq!(data.jobs().indices_with(experiment_ledger::jobs::Status::Open), vec![1]);
//! # Ok(())
//! # }
//! ```

mod io;
mod lock;
mod sample;

pub use lock::{LedgerLock, LockOptions, SharedLedger};
pub use sample::ExperimentSample;

use crate::domain::{Domain, Parameter};
use crate::jobs::{JobLedger, Status};
use crate::objects::{Object, StoreRegistry};
use crate::storage::{NumArray, RecordStore, Value};
use crate::{Error, Result};
use arrow::array::RecordBatch;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default base filename of a persisted ledger.
pub const DEFAULT_FILENAME: &str = "experimentdata";

/// Tabular data accepted by [`ExperimentData::append_rows`].
#[derive(Debug, Clone)]
pub enum Tabular {
    /// Arrow record batch; columns are matched by name
    Batch(RecordBatch),
    /// Dense array; columns are matched by position
    Array(NumArray),
    /// Record store; columns are matched by name
    Store(RecordStore),
}

impl From<RecordBatch> for Tabular {
    fn from(batch: RecordBatch) -> Self {
        Self::Batch(batch)
    }
}

impl From<NumArray> for Tabular {
    fn from(array: NumArray) -> Self {
        Self::Array(array)
    }
}

impl From<RecordStore> for Tabular {
    fn from(store: RecordStore) -> Self {
        Self::Store(store)
    }
}

impl Tabular {
    fn into_store(self, names: &[String]) -> Result<RecordStore> {
        match self {
            Self::Batch(batch) => RecordStore::from_record_batch(&batch),
            Self::Array(array) => {
                let mut store = RecordStore::new();
                store.add_array(&array, names)?;
                Ok(store)
            }
            Self::Store(store) => Ok(store),
        }
    }
}

/// The experiment ledger.
#[derive(Debug, Clone)]
pub struct ExperimentData {
    input_data: RecordStore,
    output_data: RecordStore,
    jobs: JobLedger,
    domain: Domain,
    filename: PathBuf,
    registry: StoreRegistry,
}

impl Default for ExperimentData {
    fn default() -> Self {
        Self {
            input_data: RecordStore::new(),
            output_data: RecordStore::new(),
            jobs: JobLedger::new(),
            domain: Domain::new(),
            filename: PathBuf::from(DEFAULT_FILENAME),
            registry: StoreRegistry::default(),
        }
    }
}

/// Ledgers are equal when their tables, jobs and schema are equal. The
/// filename and object registry do not take part.
impl PartialEq for ExperimentData {
    fn eq(&self, other: &Self) -> bool {
        self.input_data == other.input_data
            && self.output_data == other.output_data
            && self.jobs == other.jobs
            && self.domain == other.domain
    }
}

impl ExperimentData {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> ExperimentDataBuilder {
        ExperimentDataBuilder::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if the ledger has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Input table.
    #[must_use]
    pub const fn input_data(&self) -> &RecordStore {
        &self.input_data
    }

    /// Output table.
    #[must_use]
    pub const fn output_data(&self) -> &RecordStore {
        &self.output_data
    }

    /// Job statuses.
    #[must_use]
    pub const fn jobs(&self) -> &JobLedger {
        &self.jobs
    }

    /// Input schema.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Base path of the persisted files.
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Change the base path of the persisted files.
    pub fn set_filename(&mut self, filename: impl Into<PathBuf>) {
        self.filename = filename.into();
    }

    /// Object store registry used on commit.
    #[must_use]
    pub const fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// Replace the object store registry.
    pub fn set_registry(&mut self, registry: StoreRegistry) {
        self.registry = registry;
    }

    /// Directory that holds object files (the parent of the filename).
    #[must_use]
    pub fn project_dir(&self) -> PathBuf {
        self.filename
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    fn input_names_hint(&self) -> Vec<String> {
        if self.input_data.num_columns() > 0 {
            self.input_data.names().into_iter().map(String::from).collect()
        } else {
            self.domain.names()
        }
    }

    fn output_names_hint(&self, cols: usize) -> Vec<String> {
        if self.output_data.num_columns() > 0 {
            self.output_data.names().into_iter().map(String::from).collect()
        } else if cols == 1 {
            vec!["y".to_string()]
        } else {
            (0..cols).map(|i| format!("y{i}")).collect()
        }
    }

    /// Append input rows and (optionally) their outputs.
    ///
    /// The schema is inferred from the first rows of an empty ledger without
    /// one. Nothing is appended if coercion fails.
    fn append_stores(&mut self, mut inputs: RecordStore, outputs: Option<RecordStore>) -> Result<()> {
        let n = inputs.len();
        if let Some(outputs) = &outputs {
            if outputs.len() != n {
                return Err(Error::SchemaMismatch(format!(
                    "{n} input rows but {} output rows",
                    outputs.len()
                )));
            }
        }

        if self.domain.is_empty() && self.is_empty() {
            let inferred = Domain::from_data(&inputs);
            inferred.coerce(&mut inputs)?;
            debug!(parameters = inferred.len(), "Inferred domain from input data");
            self.domain = inferred;
        } else {
            self.domain.coerce(&mut inputs)?;
        }

        let (outputs, status) = match outputs {
            Some(outputs) => (outputs, Status::Finished),
            None => (RecordStore::with_empty_rows(n), Status::Open),
        };
        self.input_data.add(&inputs);
        self.output_data.add(&outputs);
        self.jobs.add(n, status);
        self.seal_error_rows();

        debug!(rows = n, %status, total = self.len(), "Appended rows");
        Ok(())
    }

    /// Append input rows with empty outputs; the new rows are OPEN.
    ///
    /// Arrays are matched to the existing input columns by position (or to
    /// the schema's parameter names for a ledger without inputs).
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType` for Arrow columns that cannot be held in a
    /// ledger, `SchemaMismatch` if an array has the wrong width and
    /// `TypeMismatch` if a value does not fit its parameter
    pub fn append_rows(&mut self, table: impl Into<Tabular>) -> Result<()> {
        let inputs = table.into().into_store(&self.input_names_hint())?;
        self.append_stores(inputs, None)
    }

    /// Append input rows together with their outputs; the new rows are
    /// FINISHED.
    ///
    /// # Errors
    ///
    /// As [`ExperimentData::append_rows`], plus `SchemaMismatch` if the two
    /// tables differ in length
    pub fn append_with_outputs(
        &mut self,
        input: impl Into<Tabular>,
        output: impl Into<Tabular>,
    ) -> Result<()> {
        let inputs = input.into().into_store(&self.input_names_hint())?;
        let output = output.into();
        let cols = match &output {
            Tabular::Array(array) => array.cols(),
            _ => 0,
        };
        let outputs = output.into_store(&self.output_names_hint(cols))?;
        self.append_stores(inputs, Some(outputs))
    }

    /// Append dense arrays. Rows with outputs are FINISHED, rows without
    /// are OPEN.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` on a width or length mismatch
    pub fn add_arrays(&mut self, input: &NumArray, output: Option<&NumArray>) -> Result<()> {
        match output {
            Some(output) => self.append_with_outputs(input.clone(), output.clone()),
            None => self.append_rows(input.clone()),
        }
    }

    /// Fill unset cells of output column `label` on OPEN rows, in row
    /// order, and mark the filled rows FINISHED. Claimed and settled rows
    /// are never touched. Returns the filled rows.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` only if the ledger is inconsistent
    pub fn fill_output(&mut self, values: &[f64], label: &str) -> Result<Vec<usize>> {
        let open = self.jobs.indices_with(Status::Open);
        let filled = self.output_data.fill_array(values, label, &open);
        self.seal_error_rows();

        self.jobs.mark_many_as_finished(filled.iter().copied())?;
        Ok(filled)
    }

    /// Add an input column (all `Missing`) and its parameter.
    pub fn add_new_input_column(&mut self, name: impl Into<String>, parameter: Parameter) {
        let name = name.into();
        self.input_data.add_column(name.clone());
        self.domain.add(name, parameter);
    }

    /// Add an output column (all `Missing`, `ERROR` on failed rows).
    pub fn add_new_output_column(&mut self, name: impl Into<String>) {
        self.output_data.add_column(name);
        self.seal_error_rows();
    }

    /// Write the `ERROR` sentinel into unset output cells of failed rows.
    /// Called whenever the output table may have gained columns.
    fn seal_error_rows(&mut self) {
        let failed = self.jobs.indices_with(Status::Error);
        if !failed.is_empty() {
            self.output_data.fill_missing(&failed, &Value::error_sentinel());
        }
    }

    /// Detached copy of row `index`, without claiming it.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the row does not exist
    pub fn get_experiment_sample(&self, index: usize) -> Result<ExperimentSample> {
        Ok(ExperimentSample::new(
            index,
            self.input_data.get_data_dict(index)?,
            self.output_data.get_data_dict(index)?,
        ))
    }

    /// Claim the lowest-index OPEN row: mark it IN_PROGRESS and return a
    /// detached copy.
    ///
    /// # Errors
    ///
    /// Returns `NoOpenJobs` if no row is OPEN; the ledger is unchanged
    pub fn claim_next_open_row(&mut self) -> Result<ExperimentSample> {
        let index = self.jobs.get_open_job()?;
        let sample = self.get_experiment_sample(index)?;
        self.jobs.mark_as_in_progress(index)?;
        debug!(index, "Claimed row");
        Ok(sample)
    }

    /// Write the outputs of an evaluated sample and mark its row FINISHED.
    ///
    /// Objects are written through the registry to
    /// `<project_dir>/<column>/<row>.<suffix>`; the output cell holds the
    /// path relative to the project directory. Output columns are created
    /// on demand.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the row does not exist, or the
    /// registry's error if an object cannot be written. Inline outputs are
    /// not written in that case.
    pub fn commit_row(&mut self, sample: ExperimentSample) -> Result<()> {
        let index = sample.job_number();
        self.jobs.status(index)?;

        let dir = self.project_dir();
        let mut references = Vec::with_capacity(sample.objects().len());
        for (name, object) in sample.objects() {
            let base = dir.join(name).join(index.to_string());
            let path = self.registry.save(object, &base)?;
            let relative = path
                .strip_prefix(&dir)
                .map_or_else(|_| path.clone(), Path::to_path_buf);
            references.push((name.clone(), Value::Reference(relative)));
        }

        for (name, value) in sample.outputs().iter().cloned().chain(references) {
            self.output_data.add_column(name.clone());
            self.output_data.set_data(index, value, &name)?;
        }
        self.seal_error_rows();
        self.jobs.mark_as_finished(index)?;
        debug!(index, "Committed row");
        Ok(())
    }

    /// Mark a row as failed: every output cell becomes the `ERROR`
    /// sentinel and the row becomes ERROR. Never fails; an unknown row is
    /// logged and ignored.
    pub fn fail_row(&mut self, index: usize) {
        let result = self
            .output_data
            .set_row(index, &Value::error_sentinel())
            .and_then(|()| self.jobs.mark_as_error(index));
        if let Err(err) = result {
            warn!(index, error = %err, "Cannot mark row as failed");
        }
    }

    /// Reset every row to OPEN.
    pub fn mark_all_open(&mut self) {
        self.jobs.mark_all_open();
    }

    /// True iff no row is OPEN or IN_PROGRESS.
    #[must_use]
    pub fn is_all_finished(&self) -> bool {
        self.jobs.is_all_finished()
    }

    /// Concatenate two ledgers, `self` rows first.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the schemas differ
    pub fn union(&self, other: &Self) -> Result<Self> {
        if self.domain != other.domain {
            return Err(Error::SchemaMismatch(format!(
                "cannot combine ledgers with parameters {:?} and {:?}",
                self.domain.names(),
                other.domain.names()
            )));
        }
        let mut combined = Self {
            input_data: self.input_data.combine_with(&other.input_data),
            output_data: self.output_data.combine_with(&other.output_data),
            jobs: self.jobs.combine_with(&other.jobs),
            domain: self.domain.clone(),
            filename: self.filename.clone(),
            registry: self.registry.clone(),
        };
        combined.seal_error_rows();
        Ok(combined)
    }

    /// Remove the rows at `indices` from inputs, outputs and jobs.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if any index is outside the ledger;
    /// nothing is removed in that case
    pub fn remove_rows(&mut self, indices: &[usize]) -> Result<()> {
        self.input_data.remove(indices)?;
        self.output_data.remove(indices)?;
        self.jobs.remove(indices)?;
        Ok(())
    }

    /// Remove the last `k` rows (all rows if `k` exceeds the length).
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` only if the ledger is inconsistent
    pub fn truncate_tail(&mut self, k: usize) -> Result<()> {
        if k == 0 {
            return Ok(());
        }
        let len = self.len();
        let indices: Vec<usize> = (len.saturating_sub(k)..len).collect();
        self.remove_rows(&indices)
    }

    /// Sub-ledger holding the rows at `indices`, in that order.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if any index is outside the ledger
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        Ok(Self {
            input_data: self.input_data.select(indices)?,
            output_data: self.output_data.select(indices)?,
            jobs: self.jobs.select(indices)?,
            domain: self.domain.clone(),
            filename: self.filename.clone(),
            registry: self.registry.clone(),
        })
    }

    /// Sub-ledger of the `n` rows with the lowest sum over all output
    /// columns.
    ///
    /// # Errors
    ///
    /// Returns error if the selection fails
    pub fn get_n_best_output(&self, n: usize) -> Result<Self> {
        let names = self.output_data.names();
        let indices = self.output_data.n_best_samples(n, &names)?;
        self.select(&indices)
    }

    /// Inputs of the `n` rows with the lowest sum over all output columns.
    ///
    /// # Errors
    ///
    /// Returns error if the selection fails
    pub fn get_n_best_input_parameters(&self, n: usize) -> Result<RecordStore> {
        let names = self.output_data.names();
        let indices = self.output_data.n_best_samples(n, &names)?;
        self.input_data.select(&indices)
    }

    /// Export inputs and outputs as Arrow record batches.
    ///
    /// # Errors
    ///
    /// Returns error if a batch cannot be assembled
    pub fn to_record_batches(&self) -> Result<(RecordBatch, RecordBatch)> {
        Ok((
            self.input_data.to_record_batch()?,
            self.output_data.to_record_batch()?,
        ))
    }

    /// Export inputs and outputs as dense arrays.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if a cell is not numeric
    pub fn to_arrays(&self) -> Result<(NumArray, NumArray)> {
        Ok((self.input_data.to_array()?, self.output_data.to_array()?))
    }

    /// Load the object referenced by an output cell.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the cell is not a reference and
    /// `MissingResultFile` if the file is gone
    pub fn load_object(&self, index: usize, column: &str) -> Result<Object> {
        let value = self.output_data.get(index, column)?;
        let reference = value.as_reference().ok_or_else(|| Error::TypeMismatch {
            column: column.to_string(),
            message: format!("row {index} holds a {} value, not a reference", value.type_name()),
        })?;
        self.registry.load(&self.project_dir().join(reference), None)
    }
}

/// Builder for [`ExperimentData`].
#[derive(Debug, Default)]
pub struct ExperimentDataBuilder {
    filename: Option<PathBuf>,
    domain: Option<Domain>,
    registry: Option<StoreRegistry>,
    input: Option<Tabular>,
    output: Option<Tabular>,
}

impl ExperimentDataBuilder {
    /// Base path of the persisted files (default `experimentdata`).
    #[must_use]
    pub fn filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Input schema; inferred from the input data when omitted.
    #[must_use]
    pub fn domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Object store registry (default [`StoreRegistry::default`]).
    #[must_use]
    pub fn registry(mut self, registry: StoreRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Initial input rows.
    #[must_use]
    pub fn input(mut self, input: impl Into<Tabular>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Outputs of the initial input rows; those rows start FINISHED.
    #[must_use]
    pub fn output(mut self, output: impl Into<Tabular>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Build the ledger.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if outputs are given without inputs or the
    /// two differ in length, and any error of
    /// [`ExperimentData::append_rows`]
    pub fn build(self) -> Result<ExperimentData> {
        let mut data = ExperimentData {
            domain: self.domain.unwrap_or_default(),
            filename: self
                .filename
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FILENAME)),
            registry: self.registry.unwrap_or_default(),
            ..ExperimentData::default()
        };

        match (self.input, self.output) {
            (Some(input), Some(output)) => data.append_with_outputs(input, output)?,
            (Some(input), None) => data.append_rows(input)?,
            (None, Some(_)) => {
                return Err(Error::SchemaMismatch(
                    "output data given without input data".into(),
                ))
            }
            (None, None) => {}
        }
        Ok(data)
    }
}
