//! Ledger benchmarks
//!
//! - Claim/commit cycle over an in-memory ledger
//! - Sequential vs parallel sweeps
//! - Persisting and reloading the four ledger files
//! - Best-row selection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use experiment_ledger::execution::{ExecutionMode, RunOptions};
use experiment_ledger::experiment::{ExperimentData, ExperimentSample};
use experiment_ledger::storage::NumArray;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Ledger with `rows` OPEN rows of `dim` uniform inputs
fn create_ledger(rows: usize, dim: usize) -> ExperimentData {
    let mut rng = StdRng::seed_from_u64(42);
    let inputs = (0..rows)
        .map(|_| (0..dim).map(|_| rng.gen_range(-5.0..5.0)).collect())
        .collect();
    ExperimentData::builder()
        .input(NumArray::from_rows(inputs).unwrap())
        .build()
        .unwrap()
}

/// Ledger with every row evaluated
fn create_finished_ledger(rows: usize, dim: usize) -> ExperimentData {
    let mut data = create_ledger(rows, dim);
    data.evaluate(&rosenbrock, &RunOptions::default()).unwrap();
    data
}

fn rosenbrock(mut sample: ExperimentSample) -> anyhow::Result<ExperimentSample> {
    let x = sample.input_vector();
    let y: f64 = x
        .windows(2)
        .map(|w| 100.0 * (w[1] - w[0] * w[0]).powi(2) + (1.0 - w[0]).powi(2))
        .sum();
    sample.set_output("y", y);
    Ok(sample)
}

/// Benchmark the claim/commit cycle without an evaluator
fn bench_claim_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_commit");

    for size in [100, 1_000, 10_000].iter() {
        let template = create_ledger(*size, 4);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut data = template.clone();
                while let Ok(mut sample) = data.claim_next_open_row() {
                    sample.set_output("y", 1.0);
                    data.commit_row(sample).unwrap();
                }
                black_box(data);
            });
        });
    }

    group.finish();
}

/// Benchmark sweeps by execution mode
fn bench_sweep_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    let template = create_ledger(2_000, 8);

    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let options = RunOptions::with_mode(mode);
        group.bench_with_input(BenchmarkId::from_parameter(mode), &options, |b, options| {
            b.iter(|| {
                let mut data = template.clone();
                let report = data.evaluate(&rosenbrock, options).unwrap();
                black_box(report);
            });
        });
    }

    group.finish();
}

/// Benchmark storing and reloading a finished ledger
fn bench_store_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_load");

    for size in [1_000, 10_000].iter() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = create_finished_ledger(*size, 4);
        data.set_filename(dir.path().join("bench"));

        group.bench_with_input(BenchmarkId::new("store", size), size, |b, _| {
            b.iter(|| data.store().unwrap());
        });

        group.bench_with_input(BenchmarkId::new("load", size), size, |b, _| {
            b.iter(|| {
                let loaded = ExperimentData::from_file(data.filename()).unwrap();
                black_box(loaded);
            });
        });
    }

    group.finish();
}

/// Benchmark best-row selection
fn bench_n_best(c: &mut Criterion) {
    let mut group = c.benchmark_group("n_best_output");
    let data = create_finished_ledger(50_000, 4);

    for n in [1, 10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, n| {
            b.iter(|| {
                let best = data.get_n_best_output(*n).unwrap();
                black_box(best);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_claim_commit,
    bench_sweep_modes,
    bench_store_load,
    bench_n_best
);
criterion_main!(benches);
