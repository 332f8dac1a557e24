//! Errors that make a task result faulty.

use thiserror::Error;

/// The reason a task produced a fault instead of a value.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TaskError {
    /// An aggregation task had more faulty inputs than it allows.
    #[error("too many errors: {faults} faulty inputs, at most {allowed} allowed")]
    TooManyErrors {
        /// The number of faulty inputs.
        faults: usize,
        /// The number of faulty inputs the task tolerates.
        allowed: usize,
    },

    /// An aggregation task had no usable input values.
    #[error("no values")]
    NoValues,

    /// An input value could not be used by the task.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// An upstream task or external call failed.
    #[error("{0}")]
    Upstream(String),
}
