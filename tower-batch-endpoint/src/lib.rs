//! Tower middleware for coalescing requests to the same endpoint
//!
//! This crate provides a [`Batch<S, R, Rsp>`](Batch) wrapper that turns a
//! downstream `S: Service<BatchRequest<R>>` into a `Service<R>`. Callers send
//! ordinary single requests. Requests that share an [`EndpointKey`] and arrive
//! close together are collected into one batch, the downstream service sees
//! the whole batch as a single [`BatchRequest`], and its single
//! [`BatchResponse`] is split back into one response per caller.
//!
//! ## Flush policy
//!
//! Each endpoint has at most one open batch at a time. An open batch is
//! flushed exactly once, as soon as either:
//!
//! - it holds `max_items_in_batch` pending requests, or
//! - `max_latency` has elapsed since its first request arrived.
//!
//! Both triggers race to *claim* the batch. The claim is decided under the
//! batch's own lock using an explicit [`BatchState`], so the loser always
//! observes that the batch is already `Flushing` and does nothing. A request
//! that arrives after a claim never joins the claimed batch: it opens a new
//! batch for the same endpoint.
//!
//! ## Locking
//!
//! The endpoint [`Registry`] and every batch have separate mutexes. Admission
//! takes the registry lock to look up or open a batch, releases it, and only
//! then takes the batch lock. Flushing takes the batch lock to claim, releases
//! it, then takes the registry lock to unregister. The two locks are never
//! held at the same time: the registry checks whether a batch has been claimed
//! using a flag that is readable without the batch lock.
//!
//! ## Demultiplexing
//!
//! Every pending request gets a unique [`RequestId`], which the downstream
//! service receives alongside the request. A downstream service that can echo
//! those ids back should answer with [`BatchResponse::ById`]. Services whose
//! protocol has no ids can answer with [`BatchResponse::Positional`], which is
//! matched by arrival order. Callers without a matching entry get
//! [`BatchError::MissingResponse`](error::BatchError::MissingResponse), so a
//! partial downstream answer only fails the callers it left out.
//!
//! ## Cancellation
//!
//! Dropping a response future, or cancelling [`Batch::admit_until`], stops the
//! caller from waiting but does not retract its request from the batch: the
//! downstream call still carries it. The executor delivers with a
//! non-blocking send, and logs a warning for each response nobody collects.
//!
//! ## Implementation History
//!
//! The `Batch` wrapper descends from the `tower-batch-control` middleware,
//! which drives a single queue of items through one worker task. This crate
//! keys batches by endpoint instead, and hands each flushed batch to the
//! downstream service in one call.

use std::{collections::HashMap, fmt};

pub mod error;
pub mod future;
mod batch;
mod executor;
mod layer;
mod pending;
mod service;

/// A type-erased error from the downstream service.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use self::{
    batch::{BatchState, Registry},
    executor::FlushSummary,
    layer::BatchLayer,
    pending::RequestId,
    service::{Batch, DEFAULT_DEADLINE_SLACK, FLUSH_CONCURRENCY_LIMIT},
};

/// A request that can share a batch with other requests for the same endpoint.
pub trait EndpointKey {
    /// Returns the key that decides which batch this request joins.
    fn endpoint(&self) -> String;
}

/// One pending request, as seen by the downstream batch service.
#[derive(Clone, Debug)]
pub struct BatchItem<R> {
    /// The identifier the response for this item must be matched with.
    pub id: RequestId,

    /// The caller's request.
    pub request: R,
}

/// A flushed batch: every request admitted for `endpoint`, in arrival order.
#[derive(Clone, Debug)]
pub struct BatchRequest<R> {
    /// The endpoint key shared by every item.
    pub endpoint: String,

    /// The batched requests, in the order they were admitted.
    pub items: Vec<BatchItem<R>>,
}

impl<R> BatchRequest<R> {
    /// Returns the request ids in arrival order.
    pub fn ids(&self) -> Vec<RequestId> {
        self.items.iter().map(|item| item.id).collect()
    }

    /// Returns the number of requests in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the batch has no requests.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The downstream answer to a [`BatchRequest`].
pub enum BatchResponse<Rsp> {
    /// Responses keyed by the [`RequestId`] of the item they answer.
    ///
    /// This is the preferred shape, because it does not depend on the
    /// downstream service preserving request order.
    ById(HashMap<RequestId, Rsp>),

    /// Responses in the same order as [`BatchRequest::items`].
    ///
    /// Only correct if the downstream protocol guarantees ordering.
    Positional(Vec<Rsp>),
}

impl<Rsp> BatchResponse<Rsp> {
    /// Returns the number of responses.
    pub fn len(&self) -> usize {
        match self {
            BatchResponse::ById(responses) => responses.len(),
            BatchResponse::Positional(responses) => responses.len(),
        }
    }

    /// Returns `true` if there are no responses.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<Rsp> fmt::Debug for BatchResponse<Rsp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchResponse::ById(responses) => f
                .debug_struct("ById")
                .field("ids", &responses.keys().collect::<Vec<_>>())
                .finish(),
            BatchResponse::Positional(responses) => f
                .debug_struct("Positional")
                .field("len", &responses.len())
                .finish(),
        }
    }
}
