//! Requests that are waiting inside a batch.

use std::{fmt, str::FromStr};

use tokio::{sync::oneshot, time::Instant};
use uuid::Uuid;

use crate::error::BatchError;

/// Response sender
pub(crate) type Tx<Rsp> = oneshot::Sender<Result<Rsp, BatchError>>;

/// Response receiver
pub(crate) type Rx<Rsp> = oneshot::Receiver<Result<Rsp, BatchError>>;

/// A unique identifier for an admitted request.
///
/// The downstream service uses it to match its responses to the requests in a batch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request id.
    pub fn new() -> RequestId {
        RequestId(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        RequestId(uuid)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RequestId)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An admitted request and the single-use channel its response is delivered on.
pub(crate) struct PendingRequest<R, Rsp> {
    pub(crate) id: RequestId,
    pub(crate) request: R,
    pub(crate) tx: Tx<Rsp>,

    /// The caller stops waiting at this instant.
    pub(crate) deadline: Instant,

    /// The caller's span, so delivery events are attributed to the caller.
    pub(crate) span: tracing::Span,
}

impl<R, Rsp> PendingRequest<R, Rsp> {
    pub(crate) fn new(request: R, deadline: Instant) -> (Self, Rx<Rsp>) {
        let (tx, rx) = oneshot::channel();

        let pending = PendingRequest {
            id: RequestId::new(),
            request,
            tx,
            deadline,
            span: tracing::Span::current(),
        };

        (pending, rx)
    }
}
