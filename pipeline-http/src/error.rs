//! Errors for HTTP calls and their configuration.

use thiserror::Error;

use tower_batch_endpoint::error::BatchError;

/// An error from a batched or direct HTTP call.
///
/// Errors are carried inside an [`HttpResponse`](crate::HttpResponse), and may
/// be delivered to many callers, so they are cheap to clone.
#[derive(Clone, Debug, Error)]
pub enum HttpError {
    /// The request context was cancelled, or its deadline passed, during the call.
    ///
    /// Every cancellation and timeout has this shape, whatever the transport reported.
    #[error("http request timed out or interrupted")]
    TimedOut,

    /// The request body could not be encoded.
    #[error("failed to encode request body as JSON: {0}")]
    Encode(String),

    /// The request could not be built, for example because of an invalid header.
    #[error("failed to create http request: {0}")]
    Build(String),

    /// The HTTP client failed to send the request or read the response.
    #[error("error making http request: {0}")]
    Transport(String),

    /// The response body was larger than the configured limit.
    #[error("http response body exceeded the {limit} byte limit")]
    ResponseTooLarge {
        /// The response size limit, in bytes.
        limit: u64,
    },

    /// The server answered with a non-success status.
    #[error("got error from {url}: (status code {status}) {message}")]
    Status {
        /// The request URL.
        url: String,
        /// The response status code.
        status: u16,
        /// The best-effort error message extracted from the response body.
        message: String,
    },

    /// The batch middleware could not deliver a response.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl HttpError {
    /// Returns `true` if the call was cancelled or ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HttpError::TimedOut | HttpError::Batch(BatchError::DeadlineExceeded { .. })
        )
    }
}

/// An invalid HTTP or batching configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Batches must hold at least one request.
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    /// Batches must have a non-zero window.
    #[error("batch_timeout must be greater than zero")]
    ZeroBatchTimeout,
}
