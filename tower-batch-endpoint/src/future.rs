//! Future types for the `Batch` middleware.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::ready;
use pin_project::pin_project;
use tokio::time::{sleep_until, Instant, Sleep};

use super::{error::BatchError, pending::Rx, RequestId};

/// Future that completes when the batch holding this request has executed,
/// or when the request's deadline passes.
#[pin_project]
pub struct ResponseFuture<Rsp> {
    id: RequestId,
    rx: Rx<Rsp>,
    #[pin]
    deadline: Sleep,
}

impl<Rsp> ResponseFuture<Rsp> {
    pub(crate) fn new(id: RequestId, rx: Rx<Rsp>, deadline: Instant) -> Self {
        ResponseFuture {
            id,
            rx,
            deadline: sleep_until(deadline),
        }
    }

    /// Returns the id of the request this future is waiting on.
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl<Rsp> fmt::Debug for ResponseFuture<Rsp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("id", &self.id)
            .field("deadline", &self.deadline.deadline())
            .finish()
    }
}

impl<Rsp> Future for ResponseFuture<Rsp> {
    type Output = Result<Rsp, BatchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match Pin::new(this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => return Poll::Ready(result),
            Poll::Ready(Err(_closed)) => return Poll::Ready(Err(BatchError::Closed { id: *this.id })),
            Poll::Pending => {}
        }

        ready!(this.deadline.poll(cx));

        tracing::trace!(id = %this.id, "batch response deadline expired");
        Poll::Ready(Err(BatchError::DeadlineExceeded { id: *this.id }))
    }
}
