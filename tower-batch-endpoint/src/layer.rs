use std::{fmt, marker::PhantomData, time::Duration};

use tower::{layer::Layer, Service};

use super::{service::Batch, BatchRequest, BatchResponse, BoxError, EndpointKey};

/// Adds a layer performing per-endpoint batch processing of requests.
///
/// The default Tokio executor is used to run flushes,
/// which means that this layer can only be used on the Tokio runtime.
///
/// See the crate documentation for more details.
pub struct BatchLayer<R, Rsp> {
    max_items_in_batch: usize,
    max_concurrent_flushes: Option<usize>,
    max_latency: Duration,
    _p: PhantomData<fn(R) -> Rsp>,
}

impl<R, Rsp> BatchLayer<R, Rsp> {
    /// Creates a new `BatchLayer`.
    ///
    /// The wrapper is responsible for telling the inner service when to flush a
    /// batch of requests. See [`Batch::new`] for details of each parameter.
    pub fn new(
        max_items_in_batch: usize,
        max_concurrent_flushes: impl Into<Option<usize>>,
        max_latency: Duration,
    ) -> Self {
        BatchLayer {
            max_items_in_batch,
            max_concurrent_flushes: max_concurrent_flushes.into(),
            max_latency,
            _p: PhantomData,
        }
    }
}

impl<S, R, Rsp> Layer<S> for BatchLayer<R, Rsp>
where
    S: Service<BatchRequest<R>, Response = BatchResponse<Rsp>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    R: EndpointKey + Send + 'static,
    Rsp: Send + 'static,
{
    type Service = Batch<S, R, Rsp>;

    fn layer(&self, service: S) -> Self::Service {
        Batch::new(
            service,
            self.max_items_in_batch,
            self.max_concurrent_flushes,
            self.max_latency,
        )
    }
}

impl<R, Rsp> fmt::Debug for BatchLayer<R, Rsp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLayer")
            .field("max_items_in_batch", &self.max_items_in_batch)
            .field("max_concurrent_flushes", &self.max_concurrent_flushes)
            .field("max_latency", &self.max_latency)
            .finish()
    }
}
