//! Error types for the experiment ledger
//!
//! Row-level failures (`EvaluatorFailure`, `MissingResultFile`) are converted
//! into `ERROR` job status by the execution driver. Everything else aborts the
//! call that raised it.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Experiment ledger error types
#[derive(Error, Debug)]
pub enum Error {
    /// No row is currently OPEN (sweep termination signal)
    #[error("No open jobs left in the ledger")]
    NoOpenJobs,

    /// Two ledgers (or a ledger and appended data) disagree on their schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// An artifact expected after evaluation is absent
    #[error("Missing result file: {}", .0.display())]
    MissingResultFile(PathBuf),

    /// The evaluator returned an error or panicked on a row
    #[error("Evaluator failed on row {index}: {message}")]
    EvaluatorFailure {
        /// Row that was being evaluated
        index: usize,
        /// Full diagnostic chain
        message: String,
    },

    /// Column does not exist in the record store
    #[error("Column not found: '{0}'")]
    ColumnNotFound(String),

    /// Row index outside the ledger
    #[error("Row index {index} out of bounds (ledger has {len} rows)")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Number of rows
        len: usize,
    },

    /// Value cannot be coerced to the declared parameter type
    #[error("Type mismatch in column '{column}': {message}")]
    TypeMismatch {
        /// Offending column
        column: String,
        /// What went wrong
        message: String,
    },

    /// Appended data is not a recognized tabular/array representation
    #[error("Unsupported data type: {0}")]
    UnsupportedType(String),

    /// The `_data` file of a persisted ledger is absent
    #[error("Cannot find the ledger file {}", .0.display())]
    LedgerNotFound(PathBuf),

    /// Persisted files disagree on the number of rows
    #[error("Ledger files out of sync: {inputs} input rows, {outputs} output rows, {jobs} jobs")]
    LedgerOutOfSync {
        /// Rows in the input table
        inputs: usize,
        /// Rows in the output table
        outputs: usize,
        /// Rows in the job table
        jobs: usize,
    },

    /// Lock file could not be acquired within the configured timeout
    #[error("Timed out waiting for lock {}", .0.display())]
    LockTimeout(PathBuf),

    /// Unknown execution mode string
    #[error("Invalid execution mode '{0}' (expected sequential, parallel or cluster)")]
    InvalidMode(String),

    /// Optimizer needs more existing rows than the ledger holds
    #[error("There are {available} datapoints available, need {required} for update step")]
    InsufficientData {
        /// Rows present in the ledger
        available: usize,
        /// Population size of the optimizer
        required: usize,
    },

    /// The optimizer could not propose a batch
    #[error("Optimizer failed: {0}")]
    OptimizerFailure(String),

    /// Storage error (Parquet/Arrow/object files)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
