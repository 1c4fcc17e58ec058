//! # experiment-ledger: Design-of-Experiments Ledger and Job-State Engine
//!
//! **Version**: 0.1.0
//!
//! Tracks a table of computational experiments (inputs, outputs and a
//! per-row job status) and drives their evaluation sequentially, on a
//! thread pool, or across processes that share the ledger on disk.
//!
//! ## Components
//!
//! - [`storage`]: columnar record store with Arrow/Parquet persistence
//! - [`jobs`]: per-row status state machine (OPEN → IN_PROGRESS → FINISHED | ERROR)
//! - [`domain`]: input schema used to coerce column types
//! - [`objects`]: pluggable serialization of results that do not fit a cell
//! - [`experiment`]: the ledger aggregate, persistence and the cross-process lock
//! - [`execution`]: sequential, parallel and cluster sweeps
//! - [`optimization`]: optimizer-driven iteration with row count reconciliation
//!
//! ## Example Usage
//!
//! ```rust
//! use experiment_ledger::execution::{ExecutionMode, RunOptions};
//! use experiment_ledger::experiment::{ExperimentData, ExperimentSample};
//! use experiment_ledger::storage::NumArray;
//!
//! # fn main() -> experiment_ledger::Result<()> {
//! let mut data = ExperimentData::builder()
//!     .input(NumArray::from_rows(vec![vec![0.0, 1.0], vec![2.0, 3.0]])?)
//!     .build()?;
//!
//! let sphere = |mut sample: ExperimentSample| -> anyhow::Result<ExperimentSample> {
//!     let y: f64 = sample.input_vector().iter().map(|x| x * x).sum();
//!     sample.set_output("y", y);
//!     Ok(sample)
//! };
//!
//! let report = data.evaluate(&sphere, &RunOptions::with_mode(ExecutionMode::Parallel))?;
//! assert_eq!(report.finished, vec![0, 1]);
//! assert!(data.is_all_finished());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod domain;
pub mod error;
pub mod execution;
pub mod experiment;
pub mod jobs;
pub mod logging;
pub mod objects;
pub mod optimization;
pub mod storage;
pub mod topk;

pub use error::{Error, Result};
pub use execution::{Evaluator, ExecutionMode, RunOptions, SweepReport};
pub use experiment::{ExperimentData, ExperimentSample, SharedLedger};
pub use optimization::Optimizer;
