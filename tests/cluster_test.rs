//! Several cluster drivers sharing one ledger on disk
//!
//! Threads stand in for processes: every driver only talks to the others
//! through the ledger files and the lock file.

use experiment_ledger::execution::{run_cluster, ExecutionMode, RunOptions, SweepReport};
use experiment_ledger::experiment::{ExperimentData, ExperimentSample, LockOptions, SharedLedger};
use experiment_ledger::jobs::Status;
use experiment_ledger::objects::Object;
use experiment_ledger::storage::{NumArray, Value};
use experiment_ledger::Error;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn fast_lock() -> LockOptions {
    LockOptions {
        retry_interval: Duration::from_millis(2),
        timeout: Some(Duration::from_secs(60)),
    }
}

fn seed_ledger(base: &Path, rows: usize) {
    #[allow(clippy::cast_precision_loss)]
    let xs: Vec<f64> = (0..rows).map(|i| i as f64).collect();
    ExperimentData::builder()
        .filename(base)
        .input(NumArray::column_vector(xs))
        .build()
        .unwrap()
        .store()
        .unwrap();
}

fn cube(mut sample: ExperimentSample) -> anyhow::Result<ExperimentSample> {
    let x = sample.input_vector()[0];
    thread::sleep(Duration::from_millis(1));
    if x == 5.0 {
        anyhow::bail!("solver did not converge");
    }
    sample.set_output("y", x * x * x);
    Ok(sample)
}

#[test]
fn test_concurrent_drivers_settle_every_row_once() {
    let dir = tempfile::tempdir().unwrap();
    let base = Arc::new(dir.path().join("shared"));
    let rows = 24;
    seed_ledger(&base, rows);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let base = Arc::clone(&base);
            thread::spawn(move || -> SweepReport {
                let mut local = ExperimentData::builder()
                    .filename(base.as_path())
                    .build()
                    .unwrap();
                run_cluster(&mut local, &cube, &fast_lock()).unwrap()
            })
        })
        .collect();
    let reports: Vec<SweepReport> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut settled = BTreeSet::new();
    for report in &reports {
        for index in report
            .finished
            .iter()
            .copied()
            .chain(report.failed.iter().map(|f| f.index))
        {
            assert!(settled.insert(index), "row {index} settled twice");
        }
    }
    assert_eq!(settled.len(), rows);

    let data = ExperimentData::from_file(base.as_path()).unwrap();
    assert_eq!(data.jobs().count(Status::InProgress), 0);
    assert_eq!(data.jobs().count(Status::Open), 0);
    assert_eq!(data.jobs().indices_with(Status::Error), vec![5]);
    assert_eq!(data.output_data().get(3, "y").unwrap(), &Value::from(27.0));
    assert!(data.output_data().get(5, "y").unwrap().is_error());
    assert!(!SharedLedger::new(base.as_path()).lock_path().exists());
}

#[test]
fn test_cluster_mode_stores_missing_ledger_first() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("fresh");
    let mut data = ExperimentData::builder()
        .filename(&base)
        .input(NumArray::column_vector(vec![1.0, 2.0]))
        .build()
        .unwrap();

    let options = RunOptions {
        mode: ExecutionMode::Cluster,
        workers: None,
        lock: fast_lock(),
    };
    let report = data.evaluate(&cube, &options).unwrap();

    assert_eq!(report.finished, vec![0, 1]);
    assert!(data.is_all_finished());
    assert_eq!(ExperimentData::from_file(&base).unwrap(), data);
}

#[test]
fn test_cluster_objects_land_next_to_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("fields");
    seed_ledger(&base, 3);

    let evaluator = |mut sample: ExperimentSample| -> anyhow::Result<ExperimentSample> {
        let x = sample.input_vector()[0];
        sample.store_object("displacement", Object::Array(NumArray::column_vector(vec![x; 4])));
        Ok(sample)
    };
    let mut local = ExperimentData::builder().filename(&base).build().unwrap();
    run_cluster(&mut local, &evaluator, &fast_lock()).unwrap();

    for row in 0..3 {
        assert!(dir.path().join("displacement").join(format!("{row}.npy")).exists());
    }
    let expected = Object::Array(NumArray::column_vector(vec![2.0; 4]));
    assert_eq!(local.load_object(2, "displacement").unwrap(), expected);
}

#[test]
fn test_stale_lock_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("stale");
    seed_ledger(&base, 1);
    let shared = SharedLedger::new(&base).with_lock_options(LockOptions {
        retry_interval: Duration::from_millis(5),
        timeout: Some(Duration::from_millis(40)),
    });
    std::fs::write(shared.lock_path(), b"{\"pid\":0}").unwrap();

    let result = shared.transact(ExperimentData::claim_next_open_row);

    assert!(matches!(result, Err(Error::LockTimeout(_))));
    // the ledger on disk is untouched
    let data = ExperimentData::from_file(&base).unwrap();
    assert_eq!(data.jobs().count(Status::Open), 1);
}

#[test]
fn test_transact_discards_failed_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("atomic");
    seed_ledger(&base, 2);
    let shared = SharedLedger::new(&base);

    let result: experiment_ledger::Result<()> = shared.transact(|ledger| {
        ledger.claim_next_open_row()?;
        Err(Error::StorageError("abort".into()))
    });

    assert!(result.is_err());
    let data = shared.snapshot().unwrap();
    assert_eq!(data.jobs().count(Status::Open), 2);
}
