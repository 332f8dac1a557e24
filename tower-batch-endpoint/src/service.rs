//! Wrapper service for batching requests to an underlying service, per endpoint.

use std::{
    cmp::max,
    fmt,
    future::Future,
    marker::PhantomData,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    sync::Semaphore,
    task::JoinHandle,
    time::{sleep, Instant},
};
use tower::Service;
use tracing::info_span;
use tracing_futures::Instrument;

use super::{
    batch::{Admission, FlushTrigger, Registry, RequestBatch},
    error::BatchError,
    executor::{self, FlushSummary},
    future::ResponseFuture,
    pending::PendingRequest,
    BatchRequest, BatchResponse, BoxError, EndpointKey,
};

/// The maximum number of batches that can execute at the same time.
///
/// This bounds the number of flush tasks when there are many endpoints.
pub const FLUSH_CONCURRENCY_LIMIT: usize = 64;

/// How long a caller keeps waiting after the batch window has closed.
///
/// This covers the downstream call itself, and any wait for a free flush slot.
pub const DEFAULT_DEADLINE_SLACK: Duration = Duration::from_secs(30);

/// Allows requests for the same endpoint to be processed in batches.
///
/// See the crate documentation for more details.
pub struct Batch<S, R, Rsp> {
    shared: Arc<Shared<S, R, Rsp>>,

    /// How long past the batch window each caller will wait for its response.
    deadline_slack: Duration,
}

/// State shared by every clone of a [`Batch`], and by its flush tasks.
struct Shared<S, R, Rsp> {
    /// The downstream service. Each flush runs on its own clone.
    service: Mutex<S>,

    /// The open batch for each endpoint.
    registry: Arc<Registry<R, Rsp>>,

    /// Limits the number of batches executing at the same time.
    flush_permits: Semaphore,

    // Config
    //
    /// The maximum number of requests in a batch.
    max_items_in_batch: usize,

    /// The maximum delay between a batch's first request and its flush.
    max_latency: Duration,

    _rsp: PhantomData<fn() -> Rsp>,
}

impl<S, R, Rsp> fmt::Debug for Batch<S, R, Rsp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<Self>();
        f.debug_struct(name)
            .field("registry", &self.shared.registry)
            .field("max_items_in_batch", &self.shared.max_items_in_batch)
            .field("max_latency", &self.shared.max_latency)
            .field(
                "available_flush_permits",
                &self.shared.flush_permits.available_permits(),
            )
            .field("deadline_slack", &self.deadline_slack)
            .finish()
    }
}

impl<S, R, Rsp> Clone for Batch<S, R, Rsp> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            deadline_slack: self.deadline_slack,
        }
    }
}

impl<S, R, Rsp> Batch<S, R, Rsp>
where
    S: Service<BatchRequest<R>, Response = BatchResponse<Rsp>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    R: EndpointKey + Send + 'static,
    Rsp: Send + 'static,
{
    /// Creates a new `Batch` wrapping `service`, with its own endpoint registry.
    ///
    /// The wrapper is responsible for telling the inner service when to flush a
    /// batch of requests. These parameters control this policy:
    ///
    /// * `max_items_in_batch` gives the maximum number of requests per batch.
    /// * `max_concurrent_flushes` is an upper bound on the number of batches
    ///   executing at the same time, across all endpoints. If this is `None`,
    ///   we use [`FLUSH_CONCURRENCY_LIMIT`].
    /// * `max_latency` gives the maximum time a batch stays open after its first request.
    ///
    /// Flushes are spawned on the Tokio runtime, so the returned service must be
    /// called from inside a runtime.
    pub fn new(
        service: S,
        max_items_in_batch: usize,
        max_concurrent_flushes: impl Into<Option<usize>>,
        max_latency: Duration,
    ) -> Self {
        Self::with_registry(
            service,
            Arc::new(Registry::new()),
            max_items_in_batch,
            max_concurrent_flushes,
            max_latency,
        )
    }

    /// Creates a new `Batch` wrapping `service`, that keeps its batches in `registry`.
    ///
    /// See [`Batch::new`] for the meaning of the other parameters.
    pub fn with_registry(
        service: S,
        registry: Arc<Registry<R, Rsp>>,
        max_items_in_batch: usize,
        max_concurrent_flushes: impl Into<Option<usize>>,
        max_latency: Duration,
    ) -> Self {
        // Clamp config to sensible values.
        let max_items_in_batch = max(max_items_in_batch, 1);
        let max_concurrent_flushes = max_concurrent_flushes
            .into()
            .unwrap_or(FLUSH_CONCURRENCY_LIMIT)
            .clamp(1, FLUSH_CONCURRENCY_LIMIT);

        let shared = Shared {
            service: Mutex::new(service),
            registry,
            flush_permits: Semaphore::new(max_concurrent_flushes),
            max_items_in_batch,
            max_latency,
            _rsp: PhantomData,
        };

        Batch {
            shared: Arc::new(shared),
            deadline_slack: DEFAULT_DEADLINE_SLACK,
        }
    }

    /// Sets how long each caller waits for its response after the batch window closes.
    pub fn with_deadline_slack(mut self, deadline_slack: Duration) -> Self {
        self.deadline_slack = deadline_slack;
        self
    }

    /// Returns the registry that holds this service's open batches.
    pub fn registry(&self) -> &Arc<Registry<R, Rsp>> {
        &self.shared.registry
    }

    /// Returns the number of requests waiting in the open batch for `endpoint`.
    pub fn pending_len(&self, endpoint: &str) -> usize {
        self.shared
            .registry
            .get(endpoint)
            .map_or(0, |batch| batch.len())
    }

    /// Admits `request` into its endpoint's batch, then waits for its response
    /// or for `cancelled` to complete, whichever happens first.
    ///
    /// Cancellation only stops the wait: the request stays in its batch, and
    /// its response is dropped when the batch executes.
    pub async fn admit_until<C>(&self, request: R, cancelled: C) -> Result<Rsp, BatchError>
    where
        C: Future<Output = ()>,
    {
        let response = self.enqueue(request);
        let id = response.id();

        tokio::select! {
            biased;

            () = cancelled => {
                tracing::trace!(%id, "caller stopped waiting for its batch response");
                Err(BatchError::Cancelled)
            }
            result = response => result,
        }
    }

    /// Flushes the open batch for `endpoint` now, and waits for it to execute.
    ///
    /// Returns `None` if the endpoint has no open batch, or another flush
    /// claimed it first.
    pub async fn flush(&self, endpoint: &str) -> Option<FlushSummary> {
        let batch = self.shared.registry.remove(endpoint)?;
        let requests = batch.claim(FlushTrigger::Forced)?;

        tracing::trace!(endpoint, pending = requests.len(), "forced batch flush");

        Some(
            self.shared
                .execute(batch, requests, FlushTrigger::Forced)
                .await,
        )
    }

    /// Admits `request` into the open batch for its endpoint.
    fn enqueue(&self, request: R) -> ResponseFuture<Rsp> {
        let endpoint = request.endpoint();
        let deadline = Instant::now() + self.shared.max_latency + self.deadline_slack;

        let (mut pending, rx) = PendingRequest::new(request, deadline);
        let id = pending.id;

        loop {
            let batch = self.shared.registry.get_or_open(&endpoint);

            let shared = self.shared.clone();
            let timer_batch = batch.clone();
            let admission = batch.push(pending, self.shared.max_items_in_batch, move || {
                shared.arm_timer(timer_batch)
            });

            match admission {
                Admission::Opened => {
                    tracing::trace!(%endpoint, %id, "batch is new, starting timer");
                }
                Admission::Joined { pending } => {
                    tracing::trace!(
                        %endpoint,
                        %id,
                        pending,
                        "waiting for full batch or batch timer",
                    );
                }
                Admission::Full(requests) => {
                    tracing::trace!(%endpoint, %id, batch_size = requests.len(), "batch is full");

                    self.shared.spawn_flush(batch, requests);
                }
                Admission::Closed(returned) => {
                    tracing::trace!(%endpoint, %id, "batch was claimed before the request joined, retrying");

                    pending = returned;
                    continue;
                }
            }

            return ResponseFuture::new(id, rx, deadline);
        }
    }
}

impl<S, R, Rsp> Shared<S, R, Rsp>
where
    S: Service<BatchRequest<R>, Response = BatchResponse<Rsp>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    R: EndpointKey + Send + 'static,
    Rsp: Send + 'static,
{
    /// Spawns the latency flush task for a newly opened batch.
    fn arm_timer(self: Arc<Self>, batch: Arc<RequestBatch<R, Rsp>>) -> JoinHandle<()> {
        let span = info_span!("endpoint batch timer", endpoint = batch.endpoint());
        let max_latency = self.max_latency;

        tokio::spawn(
            async move {
                sleep(max_latency).await;

                match batch.claim(FlushTrigger::Latency) {
                    Some(requests) => {
                        tracing::trace!(batch_size = requests.len(), "batch timer expired");

                        self.registry.remove_batch(&batch);
                        self.execute(batch, requests, FlushTrigger::Latency).await;
                    }
                    None => tracing::trace!("batch timer expired after the batch was flushed"),
                }
            }
            .instrument(span),
        )
    }

    /// Spawns a flush for a batch that has already been claimed.
    fn spawn_flush(
        self: &Arc<Self>,
        batch: Arc<RequestBatch<R, Rsp>>,
        requests: Vec<PendingRequest<R, Rsp>>,
    ) {
        self.registry.remove_batch(&batch);

        let span = info_span!("endpoint batch flush", endpoint = batch.endpoint());
        let shared = self.clone();

        tokio::spawn(
            async move {
                shared.execute(batch, requests, FlushTrigger::Size).await;
            }
            .instrument(span),
        );
    }

    /// Runs a claimed batch on the downstream service, once a flush slot is free.
    async fn execute(
        &self,
        batch: Arc<RequestBatch<R, Rsp>>,
        requests: Vec<PendingRequest<R, Rsp>>,
        trigger: FlushTrigger,
    ) -> FlushSummary {
        let _permit = self
            .flush_permits
            .acquire()
            .await
            .expect("flush semaphore is never closed");

        let service = self
            .service
            .lock()
            .expect("previous task panicked while holding the service mutex")
            .clone();

        let summary = executor::execute(service, batch.endpoint().to_owned(), requests).await;
        batch.finish();

        tracing::debug!(
            endpoint = %summary.endpoint,
            ?trigger,
            batch_size = summary.size,
            delivered = summary.delivered,
            dropped = summary.dropped,
            "batch finished executing",
        );

        summary
    }
}

impl<S, R, Rsp> Service<R> for Batch<S, R, Rsp>
where
    S: Service<BatchRequest<R>, Response = BatchResponse<Rsp>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    R: EndpointKey + Send + 'static,
    Rsp: Send + 'static,
{
    type Response = Rsp;
    type Error = BatchError;
    type Future = ResponseFuture<Rsp>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Admission never waits: backpressure is applied to flushes instead.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: R) -> Self::Future {
        self.enqueue(request)
    }
}
