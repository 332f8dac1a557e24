//! Task results, and the fault-tolerant aggregation tasks that consume them.
//!
//! A pipeline task resolves to a [`TaskResult`]: a value, a fault, or neither.
//! Aggregation tasks like [`MaxTask`] combine many upstream results, and
//! tolerate a bounded number of faulty inputs. Batched and direct HTTP calls
//! both feed these tasks, so a dropped or missing batch response must surface
//! as a single faulty input rather than failing the whole aggregation.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod max;
mod result;

pub use error::TaskError;
pub use max::MaxTask;
pub use result::TaskResult;
