//! Job ledger: one status per ledger row
//!
//! ## State machine
//!
//! ```text
//! OPEN ──claim──> IN_PROGRESS ──commit──> FINISHED
//!                      │
//!                      └──────fail──────> ERROR
//! ```
//!
//! Transitions overwrite (last writer wins); the only way back to OPEN is
//! [`JobLedger::mark_all_open`].

use crate::{Error, Result};
use arrow::array::{Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Status of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Not yet claimed.
    Open,
    /// Claimed by a worker, evaluation running.
    InProgress,
    /// Result committed.
    Finished,
    /// Evaluation failed; outputs hold the error sentinel.
    Error,
}

impl Status {
    /// Tag used in the persisted job table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
        }
    }

    /// FINISHED and ERROR are terminal.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OPEN" => Ok(Self::Open),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "FINISHED" => Ok(Self::Finished),
            "ERROR" => Ok(Self::Error),
            other => Err(Error::StorageError(format!("Unknown job status '{other}'"))),
        }
    }
}

/// Status table, one entry per row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobLedger {
    jobs: Vec<Status>,
}

impl JobLedger {
    /// Create an empty job ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger of `len` rows with the same status.
    #[must_use]
    pub fn filled(len: usize, status: Status) -> Self {
        Self {
            jobs: vec![status; len],
        }
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

    /// All statuses in row order.
    #[must_use]
    pub fn statuses(&self) -> &[Status] {
        &self.jobs
    }

    /// Status of one row.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the row does not exist
    pub fn status(&self, index: usize) -> Result<Status> {
        self.jobs
            .get(index)
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                index,
                len: self.jobs.len(),
            })
    }

    /// Number of rows with the given status.
    #[must_use]
    pub fn count(&self, status: Status) -> usize {
        self.jobs.iter().filter(|s| **s == status).count()
    }

    /// Row indices with the given status, ascending.
    #[must_use]
    pub fn indices_with(&self, status: Status) -> Vec<usize> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == status)
            .map(|(i, _)| i)
            .collect()
    }

    /// Append `n` rows with `status`.
    pub fn add(&mut self, n: usize, status: Status) {
        self.jobs.extend(std::iter::repeat(status).take(n));
    }

    /// Row-wise concatenation, `self` first.
    #[must_use]
    pub fn combine_with(&self, other: &Self) -> Self {
        let mut jobs = self.jobs.clone();
        jobs.extend_from_slice(&other.jobs);
        Self { jobs }
    }

    /// Drop the rows at `indices`; the rest are re-packed from 0.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if any index is outside the ledger; nothing
    /// is removed in that case
    pub fn remove(&mut self, indices: &[usize]) -> Result<()> {
        let mut keep = vec![true; self.jobs.len()];
        for &index in indices {
            self.set_flag(&mut keep, index)?;
        }
        let mut flags = keep.iter();
        self.jobs.retain(|_| *flags.next().unwrap_or(&true));
        Ok(())
    }

    fn set_flag(&self, keep: &mut [bool], index: usize) -> Result<()> {
        let len = self.jobs.len();
        let slot = keep
            .get_mut(index)
            .ok_or(Error::IndexOutOfBounds { index, len })?;
        *slot = false;
        Ok(())
    }

    /// New ledger holding the rows at `indices`, in that order.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if any index is outside the ledger
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        Ok(Self {
            jobs: indices
                .iter()
                .map(|&i| self.status(i))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn set(&mut self, index: usize, status: Status) -> Result<()> {
        let len = self.jobs.len();
        let slot = self
            .jobs
            .get_mut(index)
            .ok_or(Error::IndexOutOfBounds { index, len })?;
        *slot = status;
        Ok(())
    }

    /// Lowest-index OPEN row.
    ///
    /// # Errors
    ///
    /// Returns `NoOpenJobs` if no row is OPEN
    pub fn get_open_job(&self) -> Result<usize> {
        self.jobs
            .iter()
            .position(|s| *s == Status::Open)
            .ok_or(Error::NoOpenJobs)
    }

    /// Mark a row as claimed.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the row does not exist
    pub fn mark_as_in_progress(&mut self, index: usize) -> Result<()> {
        self.set(index, Status::InProgress)
    }

    /// Mark one row as finished.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the row does not exist
    pub fn mark_as_finished(&mut self, index: usize) -> Result<()> {
        self.set(index, Status::Finished)
    }

    /// Mark several rows as finished.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` on the first row that does not exist; rows
    /// before it are already marked
    pub fn mark_many_as_finished<I: IntoIterator<Item = usize>>(&mut self, indices: I) -> Result<()> {
        for index in indices {
            self.set(index, Status::Finished)?;
        }
        Ok(())
    }

    /// Mark a row as failed.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` if the row does not exist
    pub fn mark_as_error(&mut self, index: usize) -> Result<()> {
        self.set(index, Status::Error)
    }

    /// Reset every row to OPEN, whatever its state.
    pub fn mark_all_open(&mut self) {
        self.jobs.fill(Status::Open);
    }

    /// True iff no row is OPEN or IN_PROGRESS.
    #[must_use]
    pub fn is_all_finished(&self) -> bool {
        self.jobs.iter().all(|s| s.is_settled())
    }

    /// Export as an Arrow batch of `(index, status)`.
    ///
    /// # Errors
    ///
    /// Returns error if the batch cannot be assembled
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("index", DataType::Int64, false),
            Field::new("status", DataType::Utf8, false),
        ]));
        let index = Int64Array::from_iter_values(
            (0..self.jobs.len()).map(|i| i64::try_from(i).unwrap_or(i64::MAX)),
        );
        let status = StringArray::from_iter_values(self.jobs.iter().map(|s| s.as_str()));
        Ok(RecordBatch::try_new(
            schema,
            vec![Arc::new(index), Arc::new(status)],
        )?)
    }

    /// Import a batch of `(index, status)`.
    ///
    /// Rows are placed by their index column, so the table may be stored in
    /// any order; gaps are filled with OPEN. Indices must lie below the
    /// number of rows in the batch.
    ///
    /// # Errors
    ///
    /// Returns error if the columns are missing, mistyped or hold unknown
    /// status tags
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let index = batch
            .column_by_name("index")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| Error::StorageError("job table lacks an Int64 'index' column".into()))?;
        let status = batch
            .column_by_name("status")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::StorageError("job table lacks a Utf8 'status' column".into()))?;

        let mut placed: Vec<(usize, Status)> = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            if index.is_null(row) || status.is_null(row) {
                return Err(Error::StorageError(format!("job table row {row} is null")));
            }
            let position = usize::try_from(index.value(row)).map_err(|_| {
                Error::StorageError(format!("negative job index {}", index.value(row)))
            })?;
            if position >= batch.num_rows() {
                return Err(Error::StorageError(format!(
                    "job index {position} out of range for a table of {} rows",
                    batch.num_rows()
                )));
            }
            placed.push((position, status.value(row).parse()?));
        }

        let len = placed.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
        let mut jobs = vec![Status::Open; len];
        for (position, status) in placed {
            jobs[position] = status;
        }
        Ok(Self { jobs })
    }

    /// Write the job table to Parquet.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let batch = self.to_record_batch()?;
        let tmp = path.with_extension("parquet.tmp");
        let mut writer = ArrowWriter::try_new(File::create(&tmp)?, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a job table written by [`JobLedger::store`].
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
        let schema = builder.schema().clone();
        let batches = builder
            .build()?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = arrow::compute::concat_batches(&schema, &batches)?;
        Self::from_record_batch(&batch)
    }
}
