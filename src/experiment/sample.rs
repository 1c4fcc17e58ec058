//! Detached copy of one ledger row handed to an evaluator

use crate::objects::Object;
use crate::storage::{Row, Value};

/// One claimed row: its inputs, the outputs written so far, and objects to
/// be stored next to the ledger on commit.
///
/// A sample is a plain value. Mutating it does not touch the ledger until it
/// is passed back to
/// [`ExperimentData::commit_row`](super::ExperimentData::commit_row).
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSample {
    job_number: usize,
    inputs: Row,
    outputs: Row,
    objects: Vec<(String, Object)>,
}

impl ExperimentSample {
    /// Create a sample for row `job_number`.
    #[must_use]
    pub const fn new(job_number: usize, inputs: Row, outputs: Row) -> Self {
        Self {
            job_number,
            inputs,
            outputs,
            objects: Vec::new(),
        }
    }

    /// Row index in the ledger.
    #[must_use]
    pub const fn job_number(&self) -> usize {
        self.job_number
    }

    /// Input values in column order.
    #[must_use]
    pub fn inputs(&self) -> &Row {
        &self.inputs
    }

    /// Inline output values in column order.
    #[must_use]
    pub fn outputs(&self) -> &Row {
        &self.outputs
    }

    /// Objects waiting to be written on commit.
    #[must_use]
    pub fn objects(&self) -> &[(String, Object)] {
        &self.objects
    }

    /// Look up an input value.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Value> {
        lookup(&self.inputs, name)
    }

    /// Look up an inline output value.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Value> {
        lookup(&self.outputs, name)
    }

    /// Look up a value by name, inputs first.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.input(name).or_else(|| self.output(name))
    }

    /// Inputs as `f64` in column order; non-numeric cells become `NaN`.
    #[must_use]
    pub fn input_vector(&self) -> Vec<f64> {
        self.inputs
            .iter()
            .map(|(_, v)| v.as_f64().unwrap_or(f64::NAN))
            .collect()
    }

    /// Set an inline output value, replacing any earlier value or object
    /// under the same name.
    pub fn set_output(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.objects.retain(|(n, _)| *n != name);
        let value = value.into();
        match self.outputs.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.outputs.push((name, value)),
        }
    }

    /// Attach an object to be stored in an auxiliary file on commit. The
    /// output cell will hold a reference to the written file.
    pub fn store_object(&mut self, name: impl Into<String>, object: Object) {
        let name = name.into();
        self.outputs.retain(|(n, _)| *n != name);
        match self.objects.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = object,
            None => self.objects.push((name, object)),
        }
    }
}

fn lookup<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}
