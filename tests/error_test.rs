//! Tests for error types

use experiment_ledger::Error;
use std::path::PathBuf;

#[test]
fn test_no_open_jobs_error() {
    let error_str = format!("{}", Error::NoOpenJobs);
    assert!(error_str.contains("No open jobs"));
}

#[test]
fn test_schema_mismatch_error() {
    let error = Error::SchemaMismatch("x2 is not in both ledgers".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Schema mismatch"));
    assert!(error_str.contains("x2 is not in both ledgers"));
}

#[test]
fn test_missing_result_file_error() {
    let error = Error::MissingResultFile(PathBuf::from("stress/4.npy"));
    let error_str = format!("{error}");
    assert!(error_str.contains("Missing result file"));
    assert!(error_str.contains("stress/4.npy"));
}

#[test]
fn test_evaluator_failure_error() {
    let error = Error::EvaluatorFailure {
        index: 7,
        message: "mesh generation failed: negative jacobian".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("row 7"));
    assert!(error_str.contains("negative jacobian"));
}

#[test]
fn test_index_out_of_bounds_error() {
    let error = Error::IndexOutOfBounds { index: 12, len: 10 };
    let error_str = format!("{error}");
    assert!(error_str.contains("12"));
    assert!(error_str.contains("10 rows"));
}

#[test]
fn test_ledger_out_of_sync_error() {
    let error = Error::LedgerOutOfSync {
        inputs: 5,
        outputs: 5,
        jobs: 4,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("out of sync"));
    assert!(error_str.contains("4 jobs"));
}

#[test]
fn test_ledger_not_found_error() {
    let error = Error::LedgerNotFound(PathBuf::from("runs/exp_data.parquet"));
    let error_str = format!("{error}");
    assert!(error_str.contains("Cannot find"));
    assert!(error_str.contains("runs/exp_data.parquet"));
}

#[test]
fn test_lock_timeout_error() {
    let error = Error::LockTimeout(PathBuf::from("runs/exp.lock"));
    let error_str = format!("{error}");
    assert!(error_str.contains("Timed out"));
    assert!(error_str.contains("runs/exp.lock"));
}

#[test]
fn test_invalid_mode_error() {
    let error = Error::InvalidMode("threads".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("'threads'"));
    assert!(error_str.contains("sequential, parallel or cluster"));
}

#[test]
fn test_insufficient_data_error() {
    let error = Error::InsufficientData {
        available: 2,
        required: 8,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("2 datapoints"));
    assert!(error_str.contains("need 8"));
}

#[test]
fn test_optimizer_failure_error() {
    let error = Error::OptimizerFailure("surrogate fit diverged".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Optimizer failed"));
    assert!(error_str.contains("surrogate fit diverged"));
}

#[test]
fn test_type_mismatch_error() {
    let error = Error::TypeMismatch {
        column: "n_layers".to_string(),
        message: "expected integer".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("'n_layers'"));
    assert!(error_str.contains("expected integer"));
}

#[test]
fn test_storage_error() {
    let error = Error::StorageError("file not found".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file missing"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_error_debug() {
    let error = Error::ColumnNotFound("y".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("ColumnNotFound"));
}
