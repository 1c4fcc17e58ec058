//! Four-file on-disk layout of a ledger
//!
//! ```text
//! <base>_data.parquet    input table
//! <base>_output.parquet  output table
//! <base>_jobs.parquet    (index, status)
//! <base>_domain.json     input schema
//! <base>.lock            lock file (only while held)
//! ```
//!
//! Each file is written to a temporary sibling and renamed into place, but
//! the four files are not an atomic unit. Use
//! [`SharedLedger`](super::SharedLedger) when several processes write.

use super::ExperimentData;
use crate::domain::Domain;
use crate::jobs::{JobLedger, Status};
use crate::objects::StoreRegistry;
use crate::storage::RecordStore;
use crate::{Error, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub(crate) struct LedgerPaths {
    pub data: PathBuf,
    pub output: PathBuf,
    pub jobs: PathBuf,
    pub domain: PathBuf,
    pub lock: PathBuf,
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = base.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

impl LedgerPaths {
    pub fn new(base: &Path) -> Self {
        Self {
            data: suffixed(base, "_data.parquet"),
            output: suffixed(base, "_output.parquet"),
            jobs: suffixed(base, "_jobs.parquet"),
            domain: suffixed(base, "_domain.json"),
            lock: suffixed(base, ".lock"),
        }
    }
}

impl ExperimentData {
    /// Write the ledger under its own filename.
    ///
    /// # Errors
    ///
    /// Returns error if any of the files cannot be written
    pub fn store(&self) -> Result<()> {
        self.store_to(&self.filename)
    }

    /// Write the ledger under `base`.
    ///
    /// # Errors
    ///
    /// Returns error if any of the files cannot be written
    pub fn store_to<P: AsRef<Path>>(&self, base: P) -> Result<()> {
        let base = base.as_ref();
        if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let paths = LedgerPaths::new(base);

        self.input_data.store(&paths.data)?;
        self.output_data.store(&paths.output)?;
        self.jobs.store(&paths.jobs)?;
        self.domain.store(&paths.domain)?;

        debug!(base = %base.display(), rows = self.len(), "Stored ledger");
        Ok(())
    }

    /// Load a ledger written by [`ExperimentData::store`].
    ///
    /// A missing output table yields empty outputs, a missing job table
    /// marks every row OPEN, and a missing schema is inferred from the
    /// inputs.
    ///
    /// # Errors
    ///
    /// Returns `LedgerNotFound` if the input table is absent and
    /// `LedgerOutOfSync` if the files disagree on the number of rows
    pub fn from_file<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        let paths = LedgerPaths::new(base);

        if !paths.data.exists() {
            return Err(Error::LedgerNotFound(paths.data));
        }
        let input_data = RecordStore::load(&paths.data)?;
        let len = input_data.len();

        let output_data = if paths.output.exists() {
            RecordStore::load(&paths.output)?
        } else {
            info!(path = %paths.output.display(), "No output table, starting with empty outputs");
            RecordStore::with_empty_rows(len)
        };

        let jobs = if paths.jobs.exists() {
            JobLedger::load(&paths.jobs)?
        } else {
            info!(path = %paths.jobs.display(), "No job table, marking every row OPEN");
            JobLedger::filled(len, Status::Open)
        };

        let domain = if paths.domain.exists() {
            Domain::load(&paths.domain)?
        } else {
            Domain::from_data(&input_data)
        };

        if output_data.len() != len || jobs.len() != len {
            return Err(Error::LedgerOutOfSync {
                inputs: len,
                outputs: output_data.len(),
                jobs: jobs.len(),
            });
        }

        Ok(Self {
            input_data,
            output_data,
            jobs,
            domain,
            filename: base.to_path_buf(),
            registry: StoreRegistry::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Parameter;
    use crate::storage::{NumArray, Value};

    fn ledger(base: &Path) -> ExperimentData {
        let mut data = ExperimentData::builder()
            .filename(base)
            .domain(
                Domain::new()
                    .with("x0", Parameter::continuous(0.0, 1.0))
                    .with("x1", Parameter::continuous(0.0, 1.0)),
            )
            .build()
            .unwrap();
        data.append_rows(NumArray::from_rows(vec![vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap())
            .unwrap();
        data
    }

    #[test]
    fn test_paths() {
        let paths = LedgerPaths::new(Path::new("runs/exp"));
        assert_eq!(paths.data, PathBuf::from("runs/exp_data.parquet"));
        assert_eq!(paths.output, PathBuf::from("runs/exp_output.parquet"));
        assert_eq!(paths.jobs, PathBuf::from("runs/exp_jobs.parquet"));
        assert_eq!(paths.domain, PathBuf::from("runs/exp_domain.json"));
        assert_eq!(paths.lock, PathBuf::from("runs/exp.lock"));
    }

    #[test]
    fn test_missing_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ExperimentData::from_file(dir.path().join("nothing"));
        assert!(matches!(result, Err(Error::LedgerNotFound(_))));
    }

    #[test]
    fn test_missing_output_and_jobs_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("exp");
        let mut data = ledger(&base);
        data.fill_output(&[1.0, 2.0], "y").unwrap();
        data.store().unwrap();

        let paths = LedgerPaths::new(&base);
        fs::remove_file(&paths.output).unwrap();
        fs::remove_file(&paths.jobs).unwrap();

        let loaded = ExperimentData::from_file(&base).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.output_data().num_columns(), 0);
        assert_eq!(loaded.jobs().count(Status::Open), 2);
    }

    #[test]
    fn test_out_of_sync_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("exp");
        let data = ledger(&base);
        data.store().unwrap();
        JobLedger::filled(5, Status::Open)
            .store(LedgerPaths::new(&base).jobs)
            .unwrap();

        let result = ExperimentData::from_file(&base);
        assert!(matches!(
            result,
            Err(Error::LedgerOutOfSync {
                inputs: 2,
                outputs: 2,
                jobs: 5
            })
        ));
    }

    #[test]
    fn test_round_trip_with_error_rows() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nested").join("exp");
        let mut data = ledger(&base);
        let mut sample = data.claim_next_open_row().unwrap();
        sample.set_output("y", 0.25);
        data.commit_row(sample).unwrap();
        let failed = data.claim_next_open_row().unwrap();
        data.fail_row(failed.job_number());

        data.store().unwrap();
        let loaded = ExperimentData::from_file(&base).unwrap();

        assert_eq!(loaded, data);
        assert_eq!(loaded.output_data().get(1, "y").unwrap(), &Value::error_sentinel());
    }
}
