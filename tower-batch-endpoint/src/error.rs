//! Error types for the `Batch` middleware.

use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{BoxError, RequestId};

/// An error produced by the downstream service for a whole batch.
///
/// Every caller in the failed batch receives a clone of the same error.
#[derive(Clone)]
pub struct ServiceError {
    inner: Arc<BoxError>,
}

impl ServiceError {
    pub(crate) fn new(inner: BoxError) -> ServiceError {
        let inner = Arc::new(inner);
        ServiceError { inner }
    }

    /// Returns the downstream error.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &**self.inner
    }
}

impl fmt::Debug for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceError").field(&self.inner).finish()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "batch downstream call failed: {}", self.inner)
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.inner)
    }
}

/// The reason a single batched request did not get a response.
#[derive(Clone, Debug, Error)]
pub enum BatchError {
    /// The caller stopped waiting before its batch answered.
    #[error("batched request was cancelled by the caller")]
    Cancelled,

    /// The request's deadline passed before its batch answered.
    #[error("batched request {id} was not answered before its deadline")]
    DeadlineExceeded { id: RequestId },

    /// The downstream call for the whole batch failed.
    #[error(transparent)]
    Downstream(#[from] ServiceError),

    /// The downstream call succeeded, but had no response for this request.
    #[error("downstream batch response has no entry for request {id}")]
    MissingResponse { id: RequestId },

    /// The response channel closed without an answer.
    ///
    /// This happens if the flush task is dropped, for example during runtime shutdown.
    #[error("batch response channel closed before request {id} was answered")]
    Closed { id: RequestId },
}

impl BatchError {
    /// Returns `true` if the caller gave up waiting.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchError::Cancelled)
    }
}
