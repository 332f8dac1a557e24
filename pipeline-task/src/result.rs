//! The result of running a single task.

use serde_json::Value;

use crate::TaskError;

/// The outcome of a task: a value, a fault, or an empty result.
///
/// An empty result has neither a value nor an error. It is produced by lax
/// aggregation when every input was missing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskResult {
    /// The task's output value, if it produced one.
    pub value: Option<Value>,

    /// The task's fault, if it failed.
    pub error: Option<TaskError>,
}

impl TaskResult {
    /// Returns a successful result with `value`.
    pub fn value(value: impl Into<Value>) -> Self {
        TaskResult {
            value: Some(value.into()),
            error: None,
        }
    }

    /// Returns a faulty result with `error`.
    pub fn fault(error: TaskError) -> Self {
        TaskResult {
            value: None,
            error: Some(error),
        }
    }

    /// Returns a result with neither a value nor an error.
    pub fn empty() -> Self {
        TaskResult::default()
    }

    /// Returns `true` if this result is a fault.
    pub fn is_fault(&self) -> bool {
        self.error.is_some()
    }

    /// Returns `true` if this result has no error and no usable value.
    ///
    /// `null` and empty string values count as missing.
    pub fn is_missing(&self) -> bool {
        if self.is_fault() {
            return false;
        }

        match &self.value {
            None | Some(Value::Null) => true,
            Some(Value::String(text)) => text.is_empty(),
            Some(_) => false,
        }
    }
}

impl From<Result<Value, TaskError>> for TaskResult {
    fn from(result: Result<Value, TaskError>) -> Self {
        match result {
            Ok(value) => TaskResult::value(value),
            Err(error) => TaskResult::fault(error),
        }
    }
}
