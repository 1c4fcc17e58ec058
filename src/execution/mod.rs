//! Execution driver: evaluate the OPEN rows of a ledger
//!
//! Three policies share one contract: every row that was OPEN when the
//! sweep started ends FINISHED or ERROR, and nothing is left IN_PROGRESS
//! after a sweep that returns `Ok`.
//!
//! | mode         | claiming                         | evaluation                 |
//! |--------------|----------------------------------|----------------------------|
//! | `sequential` | one row at a time, in memory     | calling thread             |
//! | `parallel`   | every OPEN row up front          | rayon pool, detached copies |
//! | `cluster`    | one row at a time, under the lock | calling thread             |
//!
//! Evaluator errors and panics only fail their own row.

use crate::experiment::{ExperimentData, ExperimentSample, LedgerLock, LockOptions, SharedLedger};
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use tracing::{debug, error, info};

/// Concurrency policy of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In-process, one row at a time
    #[default]
    Sequential,
    /// In-process worker pool
    Parallel,
    /// Several processes sharing the ledger on disk
    Cluster,
}

impl ExecutionMode {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Cluster => "cluster",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "cluster" => Ok(Self::Cluster),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

/// Evaluates one design point.
///
/// Closures `Fn(ExperimentSample) -> anyhow::Result<ExperimentSample>`
/// implement this trait.
pub trait Evaluator: Send + Sync {
    /// Compute the outputs of `sample` and return it.
    ///
    /// # Errors
    ///
    /// Any error fails the row; it is logged with its full context chain.
    fn evaluate(&self, sample: ExperimentSample) -> anyhow::Result<ExperimentSample>;
}

impl<F> Evaluator for F
where
    F: Fn(ExperimentSample) -> anyhow::Result<ExperimentSample> + Send + Sync,
{
    fn evaluate(&self, sample: ExperimentSample) -> anyhow::Result<ExperimentSample> {
        self(sample)
    }
}

/// Options of a sweep; deserializable from a host application's config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Concurrency policy
    pub mode: ExecutionMode,
    /// Worker threads in parallel mode (default: one per core)
    pub workers: Option<usize>,
    /// Lock waiting policy in cluster mode
    pub lock: LockOptions,
}

impl RunOptions {
    /// Options for `mode` with defaults otherwise.
    #[must_use]
    pub fn with_mode(mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// A row that ended in ERROR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// Row index
    pub index: usize,
    /// Diagnostic
    pub message: String,
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows committed as FINISHED, in settling order
    pub finished: Vec<usize>,
    /// Rows marked ERROR, in settling order
    pub failed: Vec<RowFailure>,
}

impl SweepReport {
    /// Number of rows settled by the sweep.
    #[must_use]
    pub fn total(&self) -> usize {
        self.finished.len() + self.failed.len()
    }

    /// True if no row failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, index: usize, outcome: std::result::Result<(), RowFailure>) {
        match outcome {
            Ok(()) => self.finished.push(index),
            Err(failure) => self.failed.push(failure),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "evaluator panicked".to_string())
}

/// Run the evaluator on a detached sample, turning errors and panics into
/// `EvaluatorFailure`.
fn evaluate_guarded(evaluator: &dyn Evaluator, sample: ExperimentSample) -> Result<ExperimentSample> {
    let index = sample.job_number();
    match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(sample))) {
        Ok(Ok(evaluated)) if evaluated.job_number() == index => Ok(evaluated),
        Ok(Ok(evaluated)) => Err(Error::EvaluatorFailure {
            index,
            message: format!("evaluator returned row {}", evaluated.job_number()),
        }),
        Ok(Err(err)) => Err(Error::EvaluatorFailure {
            index,
            message: format!("{err:#}"),
        }),
        Err(payload) => Err(Error::EvaluatorFailure {
            index,
            message: format!("panic: {}", panic_message(payload.as_ref())),
        }),
    }
}

/// Commit an evaluated row, or fail it if evaluation or commit went wrong.
fn settle(
    ledger: &mut ExperimentData,
    index: usize,
    outcome: Result<ExperimentSample>,
) -> std::result::Result<(), RowFailure> {
    match outcome.and_then(|sample| ledger.commit_row(sample)) {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(index, error = %err, "Row failed, marking as ERROR");
            ledger.fail_row(index);
            Err(RowFailure {
                index,
                message: err.to_string(),
            })
        }
    }
}

/// Evaluate every OPEN row with the policy in `options`.
///
/// # Errors
///
/// Row-level failures never surface here. Returns an error for lock
/// timeouts, ledger IO failures and worker pool construction failures.
pub fn run(data: &mut ExperimentData, evaluator: &dyn Evaluator, options: &RunOptions) -> Result<SweepReport> {
    info!(mode = %options.mode, open = data.jobs().count(crate::jobs::Status::Open), "Starting sweep");
    let report = match options.mode {
        ExecutionMode::Sequential => run_sequential(data, evaluator)?,
        ExecutionMode::Parallel => run_parallel(data, evaluator, options.workers)?,
        ExecutionMode::Cluster => run_cluster(data, evaluator, &options.lock)?,
    };
    info!(
        finished = report.finished.len(),
        failed = report.failed.len(),
        "Sweep complete"
    );
    Ok(report)
}

/// Claim, evaluate and commit one row at a time.
///
/// # Errors
///
/// Returns an error only if the ledger is inconsistent
pub fn run_sequential(data: &mut ExperimentData, evaluator: &dyn Evaluator) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    loop {
        let sample = match data.claim_next_open_row() {
            Ok(sample) => sample,
            Err(Error::NoOpenJobs) => break,
            Err(err) => return Err(err),
        };
        let index = sample.job_number();
        let outcome = evaluate_guarded(evaluator, sample);
        report.record(index, settle(data, index, outcome));
    }
    Ok(report)
}

/// Claim every OPEN row, evaluate on a rayon pool of `workers` threads
/// (default: one per core) and commit in row order once all workers
/// return. Rows opened during the sweep wait for the next call.
///
/// # Errors
///
/// Returns an error if the worker pool cannot be built
pub fn run_parallel(
    data: &mut ExperimentData,
    evaluator: &dyn Evaluator,
    workers: Option<usize>,
) -> Result<SweepReport> {
    let mut samples = Vec::new();
    loop {
        match data.claim_next_open_row() {
            Ok(sample) => samples.push(sample),
            Err(Error::NoOpenJobs) => break,
            Err(err) => return Err(err),
        }
    }
    let mut report = SweepReport::default();
    if samples.is_empty() {
        return Ok(report);
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(workers) = workers {
        builder = builder.num_threads(workers.max(1));
    }
    let pool = builder
        .build()
        .map_err(|err| Error::Io(std::io::Error::other(err)))?;
    debug!(rows = samples.len(), threads = pool.current_num_threads(), "Evaluating in parallel");

    let mut results: Vec<(usize, Result<ExperimentSample>)> = pool.install(|| {
        samples
            .into_par_iter()
            .map(|sample| (sample.job_number(), evaluate_guarded(evaluator, sample)))
            .collect()
    });
    results.sort_by_key(|(index, _)| *index);

    for (index, outcome) in results {
        report.record(index, settle(data, index, outcome));
    }
    Ok(report)
}

/// Sequential sweep over the ledger on disk at `data.filename()`, shared
/// with other processes. Every claim and every commit reloads and rewrites
/// the ledger under the lock. The ledger is stored first if it is not on
/// disk yet; afterwards `data` is replaced by the on-disk state.
///
/// # Errors
///
/// Returns `LockTimeout` or any ledger IO error
pub fn run_cluster(data: &mut ExperimentData, evaluator: &dyn Evaluator, lock: &LockOptions) -> Result<SweepReport> {
    let shared = SharedLedger::new(data.filename())
        .with_registry(data.registry().clone())
        .with_lock_options(*lock);

    {
        let _guard = LedgerLock::acquire(&shared.lock_path(), lock)?;
        if let Err(Error::LedgerNotFound(path)) = ExperimentData::from_file(shared.base()) {
            info!(path = %path.display(), "No ledger on disk, storing the in-memory ledger");
            data.store()?;
        }
    }

    let mut report = SweepReport::default();
    loop {
        let sample = match shared.transact(ExperimentData::claim_next_open_row) {
            Ok(sample) => sample,
            Err(Error::NoOpenJobs) => break,
            Err(err) => return Err(err),
        };
        let index = sample.job_number();
        let outcome = evaluate_guarded(evaluator, sample);
        let settled = shared.transact(|ledger| Ok(settle(ledger, index, outcome)))?;
        report.record(index, settled);
    }

    *data = shared.snapshot()?;
    Ok(report)
}

impl ExperimentData {
    /// Evaluate every OPEN row; see [`run`].
    ///
    /// # Errors
    ///
    /// As [`run`]
    pub fn evaluate(&mut self, evaluator: &dyn Evaluator, options: &RunOptions) -> Result<SweepReport> {
        run(self, evaluator, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Status;
    use crate::storage::{NumArray, Value};
    use anyhow::bail;

    fn ledger(rows: usize) -> ExperimentData {
        #[allow(clippy::cast_precision_loss)]
        let values: Vec<f64> = (0..rows).map(|i| i as f64).collect();
        ExperimentData::builder()
            .input(NumArray::column_vector(values))
            .build()
            .unwrap()
    }

    fn square(mut sample: ExperimentSample) -> anyhow::Result<ExperimentSample> {
        let x = sample.input_vector()[0];
        if x == 3.0 {
            bail!("diverged at x = {x}");
        }
        sample.set_output("y", x * x);
        Ok(sample)
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Parallel".parse::<ExecutionMode>().unwrap(), ExecutionMode::Parallel);
        assert_eq!("CLUSTER".parse::<ExecutionMode>().unwrap(), ExecutionMode::Cluster);
        assert!(matches!(
            "threads".parse::<ExecutionMode>(),
            Err(Error::InvalidMode(mode)) if mode == "threads"
        ));
    }

    #[test]
    fn test_run_options_from_json() {
        let options: RunOptions =
            serde_json::from_str(r#"{"mode": "parallel", "workers": 2}"#).unwrap();
        assert_eq!(options.mode, ExecutionMode::Parallel);
        assert_eq!(options.workers, Some(2));
        assert_eq!(options.lock, LockOptions::default());
    }

    #[test]
    fn test_sequential_isolates_failures() {
        let mut data = ledger(5);
        let report = data
            .evaluate(&square, &RunOptions::with_mode(ExecutionMode::Sequential))
            .unwrap();

        assert_eq!(report.finished, vec![0, 1, 2, 4]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 3);
        assert!(report.failed[0].message.contains("diverged at x = 3"));
        assert!(data.is_all_finished());
        assert_eq!(data.jobs().status(3).unwrap(), Status::Error);
        assert_eq!(data.output_data().get(4, "y").unwrap(), &Value::from(16.0));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut sequential = ledger(8);
        let mut parallel = ledger(8);
        run_sequential(&mut sequential, &square).unwrap();
        let report = run_parallel(&mut parallel, &square, Some(3)).unwrap();

        assert_eq!(report.total(), 8);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_panics_fail_only_their_row() {
        let evaluator = |mut sample: ExperimentSample| -> anyhow::Result<ExperimentSample> {
            assert!(sample.job_number() != 1, "solver crashed");
            sample.set_output("y", 1.0);
            Ok(sample)
        };
        let mut data = ledger(3);

        let report = run_parallel(&mut data, &evaluator, Some(2)).unwrap();

        assert_eq!(report.finished, vec![0, 2]);
        assert_eq!(report.failed[0].index, 1);
        assert!(report.failed[0].message.contains("solver crashed"));
        assert_eq!(data.jobs().status(1).unwrap(), Status::Error);
    }

    #[test]
    fn test_evaluator_cannot_redirect_rows() {
        let evaluator = |sample: ExperimentSample| -> anyhow::Result<ExperimentSample> {
            Ok(ExperimentSample::new(sample.job_number() + 1, Vec::new(), Vec::new()))
        };
        let mut data = ledger(2);

        let report = run_sequential(&mut data, &evaluator).unwrap();

        assert!(report.finished.is_empty());
        assert_eq!(data.jobs().count(Status::Error), 2);
    }

    #[test]
    fn test_empty_sweep() {
        let mut data = ledger(0);
        let report = run_parallel(&mut data, &square, None).unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(report.is_clean());
    }

    #[test]
    fn test_cluster_stores_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = ledger(4);
        data.set_filename(dir.path().join("exp"));

        let report = data
            .evaluate(&square, &RunOptions::with_mode(ExecutionMode::Cluster))
            .unwrap();

        assert_eq!(report.total(), 4);
        assert!(data.is_all_finished());
        assert!(!dir.path().join("exp.lock").exists());
        assert_eq!(ExperimentData::from_file(dir.path().join("exp")).unwrap(), data);
    }
}
