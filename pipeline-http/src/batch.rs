//! The downstream service that sends one physical HTTP call per batch.

use std::{
    fmt,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use tower::Service;

use tower_batch_endpoint::{BatchRequest, BatchResponse, BoxError};

use crate::{BatchCodec, DirectExecutor, HttpRequest, HttpResponse, RequestContext};

/// Sends each flushed batch as one physical request, using a [`BatchCodec`].
///
/// If the physical call fails, the whole batch fails, and the batch middleware
/// gives every caller in the batch the same error.
pub struct HttpBatchService<C> {
    codec: Arc<C>,
    executor: Arc<DirectExecutor>,

    /// The time limit for each physical call.
    timeout: Option<Duration>,
}

impl<C> HttpBatchService<C> {
    /// Returns a service that encodes batches with `codec`, and sends them with `executor`.
    pub fn new(codec: C, executor: Arc<DirectExecutor>, timeout: impl Into<Option<Duration>>) -> Self {
        HttpBatchService {
            codec: Arc::new(codec),
            executor,
            timeout: timeout.into(),
        }
    }
}

impl<C> Clone for HttpBatchService<C> {
    fn clone(&self) -> Self {
        HttpBatchService {
            codec: self.codec.clone(),
            executor: self.executor.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C> fmt::Debug for HttpBatchService<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBatchService")
            .field("codec", &std::any::type_name::<C>())
            .field("executor", &self.executor)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<C> Service<BatchRequest<HttpRequest>> for HttpBatchService<C>
where
    C: BatchCodec,
{
    type Response = BatchResponse<HttpResponse>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: BatchRequest<HttpRequest>) -> Self::Future {
        let codec = self.codec.clone();
        let executor = self.executor.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let physical = codec.encode(&batch.endpoint, &batch.items)?;

            let ctx = match timeout {
                Some(timeout) => RequestContext::new().with_timeout(timeout),
                None => RequestContext::new(),
            };

            let mut response = executor.send(&physical, &ctx).await;

            if let Some(error) = response.error.take() {
                tracing::debug!(
                    endpoint = %batch.endpoint,
                    batch_size = batch.len(),
                    ?error,
                    "physical batch call failed",
                );

                return Err(error.into());
            }

            codec.decode(&batch.endpoint, response, &batch.ids())
        })
    }
}
