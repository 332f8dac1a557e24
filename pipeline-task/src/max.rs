//! The `max` aggregation task.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{TaskError, TaskResult};


/// Returns the largest of its input values, tolerating a bounded number of faulty inputs.
///
/// # Fault tolerance
///
/// By default, all but one input may be faulty. Set `allowed_faults` to change
/// the limit. The task fails with [`TaskError::TooManyErrors`] when there are
/// more faulty inputs than the limit.
///
/// In `lax` mode, missing inputs (no value, `null`, or an empty string) are
/// removed before the values are compared, and the task returns an empty
/// result if no values remain. Otherwise, the task fails with
/// [`TaskError::NoValues`] when there is nothing to compare, and with
/// [`TaskError::InvalidValue`] when some inputs are missing.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaxTask {
    /// The maximum number of faulty inputs, or `None` for all but one.
    pub allowed_faults: Option<usize>,

    /// Ignore missing inputs.
    pub lax: bool,
}

impl MaxTask {
    /// Returns a task that tolerates all but one faulty input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of faulty inputs.
    pub fn with_allowed_faults(mut self, allowed_faults: usize) -> Self {
        self.allowed_faults = Some(allowed_faults);
        self
    }

    /// Sets lax mode.
    pub fn with_lax(mut self, lax: bool) -> Self {
        self.lax = lax;
        self
    }

    /// Returns the number of faulty inputs this task tolerates, out of `inputs`.
    pub fn allowed_faults(&self, inputs: usize) -> usize {
        self.allowed_faults
            .unwrap_or_else(|| inputs.saturating_sub(1))
    }

    /// Runs the task on the results of its upstream tasks.
    pub fn run(&self, inputs: &[TaskResult]) -> TaskResult {
        match self.max(inputs) {
            Ok(Some(value)) => TaskResult::value(value),
            Ok(None) => TaskResult::empty(),
            Err(error) => {
                tracing::debug!(?error, inputs = inputs.len(), lax = self.lax, "max task failed");
                TaskResult::fault(error)
            }
        }
    }

    fn max(&self, inputs: &[TaskResult]) -> Result<Option<Value>, TaskError> {
        let allowed = self.allowed_faults(inputs.len());

        let inputs: Vec<&TaskResult> = inputs
            .iter()
            .filter(|input| !(self.lax && input.is_missing()))
            .collect();

        let faults = inputs.iter().filter(|input| input.is_fault()).count();
        if faults > allowed {
            return Err(TaskError::TooManyErrors { faults, allowed });
        }

        let (missing, present): (Vec<&TaskResult>, Vec<&TaskResult>) = inputs
            .into_iter()
            .filter(|input| !input.is_fault())
            .partition(|input| input.is_missing());

        if present.is_empty() {
            return if self.lax {
                Ok(None)
            } else {
                Err(TaskError::NoValues)
            };
        }

        if !missing.is_empty() {
            return Err(TaskError::InvalidValue(format!(
                "{} inputs have no value",
                missing.len()
            )));
        }

        let mut largest: Option<(f64, &Value)> = None;

        for value in present.into_iter().filter_map(|input| input.value.as_ref()) {
            let number = numeric(value)?;

            if largest.map_or(true, |(current, _)| number > current) {
                largest = Some((number, value));
            }
        }

        Ok(largest.map(|(_, value)| value.clone()))
    }
}

/// Returns `value` as a finite number.
///
/// Accepts JSON numbers, and strings containing a decimal number.
fn numeric(value: &Value) -> Result<f64, TaskError> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };

    number
        .filter(|number| number.is_finite())
        .ok_or_else(|| TaskError::InvalidValue(value.to_string()))
}
