//! Per-endpoint request batches, and the registry of open batches.

use std::{
    collections::HashMap,
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio::task::JoinHandle;

use crate::pending::PendingRequest;


/// The lifecycle of a single batch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BatchState {
    /// The batch is registered and accepting requests.
    Pending,

    /// A flush has claimed the batch. No more requests can join it.
    Flushing,

    /// Every response has been delivered or dropped.
    Done,
}

/// What caused a batch to be flushed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum FlushTrigger {
    /// The batch reached its maximum size.
    Size,

    /// The batch timer expired.
    Latency,

    /// A caller asked for the endpoint to be flushed.
    Forced,
}

/// The result of adding a request to a batch.
pub(crate) enum Admission<R, Rsp> {
    /// The request opened the batch, and the batch timer was armed.
    Opened,

    /// The request joined a batch that is still below its size limit.
    Joined { pending: usize },

    /// The request filled the batch. The caller has claimed the batch and
    /// must execute these requests.
    Full(Vec<PendingRequest<R, Rsp>>),

    /// The batch was claimed before the request could join, so the request
    /// is handed back to be admitted into a new batch.
    Closed(PendingRequest<R, Rsp>),
}

/// The open requests for one endpoint.
pub(crate) struct RequestBatch<R, Rsp> {
    endpoint: String,

    /// Set when the batch leaves [`BatchState::Pending`], under the batch lock.
    ///
    /// The registry reads it without taking the batch lock.
    claimed: AtomicBool,

    inner: Mutex<BatchInner<R, Rsp>>,
}

struct BatchInner<R, Rsp> {
    state: BatchState,

    /// Requests in arrival order.
    pending: Vec<PendingRequest<R, Rsp>>,

    /// The latency flush task, armed by the first request.
    timer: Option<JoinHandle<()>>,
}

impl<R, Rsp> RequestBatch<R, Rsp> {
    fn new(endpoint: String) -> Self {
        RequestBatch {
            endpoint,
            claimed: AtomicBool::new(false),
            inner: Mutex::new(BatchInner {
                state: BatchState::Pending,
                pending: Vec::new(),
                timer: None,
            }),
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn lock(&self) -> MutexGuard<'_, BatchInner<R, Rsp>> {
        self.inner
            .lock()
            .expect("previous task panicked while holding the batch mutex")
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> BatchState {
        self.lock().state
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Returns `true` if a flush has claimed this batch.
    ///
    /// Does not take the batch lock. A batch that is claimed just after this
    /// returns `false` rejects new requests with [`Admission::Closed`].
    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Moves a pending batch to [`BatchState::Flushing`]. The batch lock must be held.
    fn start_flushing(&self, inner: &mut BatchInner<R, Rsp>) {
        inner.state = BatchState::Flushing;
        self.claimed.store(true, Ordering::Release);
    }

    /// Adds `request` to this batch.
    ///
    /// If the request is the first in the batch, and does not fill it, `arm_timer`
    /// is called with the batch lock held, and its handle becomes the batch timer.
    /// If the request fills the batch, the batch is claimed for a size flush and
    /// its timer is cancelled.
    pub(crate) fn push(
        &self,
        request: PendingRequest<R, Rsp>,
        max_items_in_batch: usize,
        arm_timer: impl FnOnce() -> JoinHandle<()>,
    ) -> Admission<R, Rsp> {
        let mut inner = self.lock();

        if inner.state != BatchState::Pending {
            return Admission::Closed(request);
        }

        inner.pending.push(request);
        let pending = inner.pending.len();

        if pending >= max_items_in_batch {
            self.start_flushing(&mut inner);
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }

            return Admission::Full(mem::take(&mut inner.pending));
        }

        if pending == 1 {
            inner.timer = Some(arm_timer());
            return Admission::Opened;
        }

        Admission::Joined { pending }
    }

    /// Claims this batch for a flush, returning its requests.
    ///
    /// Returns `None` if another flush has already claimed the batch.
    pub(crate) fn claim(&self, trigger: FlushTrigger) -> Option<Vec<PendingRequest<R, Rsp>>> {
        let mut inner = self.lock();

        if inner.state != BatchState::Pending {
            return None;
        }

        self.start_flushing(&mut inner);

        // The timer task is the one running this claim, so it must not abort itself.
        let timer = inner.timer.take();
        if trigger != FlushTrigger::Latency {
            if let Some(timer) = timer {
                timer.abort();
            }
        }

        Some(mem::take(&mut inner.pending))
    }

    /// Marks a claimed batch as fully delivered.
    pub(crate) fn finish(&self) {
        self.lock().state = BatchState::Done;
    }
}

impl<R, Rsp> fmt::Debug for RequestBatch<R, Rsp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("RequestBatch")
            .field("endpoint", &self.endpoint)
            .field("state", &inner.state)
            .field("pending", &inner.pending.len())
            .field("timer_armed", &inner.timer.is_some())
            .finish()
    }
}

/// The open batch for each endpoint.
///
/// A registry is owned by one or more [`Batch`](crate::Batch) handles. Handles
/// created with [`Batch::new`](crate::Batch::new) get their own registry, so
/// independent middleware instances never share batches.
pub struct Registry<R, Rsp> {
    batches: Mutex<HashMap<String, Arc<RequestBatch<R, Rsp>>>>,
}

impl<R, Rsp> Registry<R, Rsp> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry {
            batches: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<RequestBatch<R, Rsp>>>> {
        self.batches
            .lock()
            .expect("previous task panicked while holding the registry mutex")
    }

    /// Returns the number of endpoints with an open batch.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no endpoint has an open batch.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns `true` if `endpoint` has an open batch.
    pub fn contains(&self, endpoint: &str) -> bool {
        self.lock().contains_key(endpoint)
    }

    /// Returns the open batch for `endpoint`, opening a new one if needed.
    ///
    /// A registered batch that has already been claimed is replaced, so new
    /// requests never join a batch that is executing.
    pub(crate) fn get_or_open(&self, endpoint: &str) -> Arc<RequestBatch<R, Rsp>> {
        let mut batches = self.lock();

        if let Some(batch) = batches.get(endpoint) {
            if !batch.is_claimed() {
                return batch.clone();
            }
        }

        let batch = Arc::new(RequestBatch::new(endpoint.to_owned()));
        batches.insert(endpoint.to_owned(), batch.clone());

        batch
    }

    /// Returns the open batch for `endpoint`, if any.
    pub(crate) fn get(&self, endpoint: &str) -> Option<Arc<RequestBatch<R, Rsp>>> {
        self.lock().get(endpoint).cloned()
    }

    /// Unregisters and returns the batch for `endpoint`, if any.
    pub(crate) fn remove(&self, endpoint: &str) -> Option<Arc<RequestBatch<R, Rsp>>> {
        self.lock().remove(endpoint)
    }

    /// Unregisters `batch`, unless its endpoint has already moved on to a newer batch.
    pub(crate) fn remove_batch(&self, batch: &Arc<RequestBatch<R, Rsp>>) {
        let mut batches = self.lock();

        let is_registered = batches
            .get(batch.endpoint())
            .is_some_and(|registered| Arc::ptr_eq(registered, batch));

        if is_registered {
            batches.remove(batch.endpoint());
        }
    }
}

impl<R, Rsp> Default for Registry<R, Rsp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, Rsp> fmt::Debug for Registry<R, Rsp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("endpoints", &self.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
