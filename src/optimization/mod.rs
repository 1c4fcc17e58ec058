//! Iteration controller: alternate optimizer proposals with evaluation
//!
//! A population-based optimizer proposes `P` rows per round, so reaching
//! exactly `N` new rows takes `ceil(N / P)` rounds and overshoots by
//! `P - N % P` rows when `P` does not divide `N`. The overshoot is trimmed
//! from the tail after the last round.
//!
//! ```text
//! N = 10, P = 3
//! round   1     2     3     4
//! rows   +3    +3    +3    +3   = 12  →  truncate_tail(2)  →  +10
//! ```

use crate::execution::{run_sequential, Evaluator};
use crate::experiment::{ExperimentData, Tabular};
use crate::{Error, Result};
use tracing::{debug, info, warn};

/// Proposes new design points from the evaluated history.
pub trait Optimizer {
    /// Rows proposed per round.
    fn population(&self) -> usize;

    /// Propose the next batch. The returned ledger must share the schema of
    /// the ledger being optimized; rows without outputs are evaluated by
    /// the controller.
    ///
    /// An empty batch ends the run early.
    ///
    /// # Errors
    ///
    /// Any error aborts the run
    fn propose(&mut self, evaluator: &dyn Evaluator) -> anyhow::Result<ExperimentData>;

    /// Observe the ledger after a round (and once before the first).
    fn absorb(&mut self, data: &ExperimentData);

    /// Clear internal state at the end of a run.
    fn reset(&mut self) {}
}

/// Rounds needed to obtain `iterations` rows: `ceil(iterations / population)`.
#[must_use]
pub const fn number_of_updates(iterations: usize, population: usize) -> usize {
    iterations.div_ceil(population)
}

/// Rows proposed beyond `iterations` by [`number_of_updates`] full rounds.
#[must_use]
pub const fn number_of_overiterations(iterations: usize, population: usize) -> usize {
    match iterations % population {
        0 => 0,
        rest => population - rest,
    }
}

/// Append `copies` copies of input row `index` as OPEN rows.
fn repeat_row(data: &mut ExperimentData, index: usize, copies: usize) -> Result<()> {
    if copies == 0 {
        return Ok(());
    }
    let repeated = data.input_data().select(&vec![index; copies])?;
    data.append_rows(Tabular::Store(repeated))
}

/// Grow `data` by exactly `iterations` evaluated rows proposed by
/// `optimizer`.
///
/// The optimizer absorbs the ledger before the first round and after every
/// round. A round that proposes nothing is replaced by copies of the best
/// row so far, and the run stops. Rows beyond `iterations` are removed from
/// the tail; missing rows are filled with copies of the last design.
///
/// # Errors
///
/// Returns `InsufficientData` if the ledger holds fewer rows than the
/// optimizer's population, `OptimizerFailure` if a proposal fails and
/// `SchemaMismatch` if a proposal has a different schema
pub fn optimize(
    data: &mut ExperimentData,
    optimizer: &mut dyn Optimizer,
    evaluator: &dyn Evaluator,
    iterations: usize,
) -> Result<()> {
    let population = optimizer.population();
    if population == 0 {
        return Err(Error::OptimizerFailure("population must be positive".into()));
    }
    let start = data.len();

    optimizer.absorb(data);
    if start < population {
        return Err(Error::InsufficientData {
            available: start,
            required: population,
        });
    }

    let rounds = number_of_updates(iterations, population);
    info!(iterations, population, rounds, "Starting optimization");

    for round in 0..rounds {
        let proposal = optimizer
            .propose(evaluator)
            .map_err(|err| Error::OptimizerFailure(format!("{err:#}")))?;

        if proposal.is_empty() {
            let missing = (start + iterations).saturating_sub(data.len());
            warn!(round, missing, "Optimizer proposed no rows, repeating the best design");
            let best = data
                .output_data()
                .n_best_samples(1, &data.output_data().names())?;
            if let Some(&index) = best.first() {
                repeat_row(data, index, missing)?;
            }
            run_sequential(data, evaluator)?;
            break;
        }

        debug!(round, rows = proposal.len(), "Appending proposal");
        *data = data.union(&proposal)?;
        run_sequential(data, evaluator)?;
        optimizer.absorb(data);
    }

    let added = data.len() - start;
    if added > iterations {
        let excess = added - iterations;
        let expected = number_of_overiterations(iterations, population);
        if excess != expected {
            warn!(excess, expected, "Optimizer overshoot differs from its population");
        }
        data.truncate_tail(excess)?;
    } else if added < iterations {
        let missing = iterations - added;
        warn!(missing, "Optimizer under-delivered, repeating the last design");
        let last = data.len() - 1;
        repeat_row(data, last, missing)?;
        run_sequential(data, evaluator)?;
    }

    optimizer.reset();
    info!(rows = data.len(), "Optimization complete");
    Ok(())
}

impl ExperimentData {
    /// Grow the ledger by `iterations` evaluated rows; see [`optimize`].
    ///
    /// # Errors
    ///
    /// As [`optimize`]
    pub fn optimize(
        &mut self,
        optimizer: &mut dyn Optimizer,
        evaluator: &dyn Evaluator,
        iterations: usize,
    ) -> Result<()> {
        optimize(self, optimizer, evaluator, iterations)
    }
}
