//! Executes one flushed batch, and hands each caller its own response.

use tokio::time::Instant;
use tower::{Service, ServiceExt};

use crate::{
    error::{BatchError, ServiceError},
    pending::{PendingRequest, Tx},
    BatchItem, BatchRequest, BatchResponse, BoxError, RequestId,
};


/// What happened to the responses of one flushed batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlushSummary {
    /// The endpoint the batch was sent to.
    pub endpoint: String,

    /// The number of requests in the batch.
    pub size: usize,

    /// The number of responses a caller received.
    pub delivered: usize,

    /// The number of responses dropped because their caller had stopped waiting.
    pub dropped: usize,
}

/// The delivery half of a pending request, kept while its request is downstream.
struct Waiter<Rsp> {
    id: RequestId,
    tx: Tx<Rsp>,
    deadline: Instant,
    span: tracing::Span,
}

/// Sends `requests` to `service` as a single batch, then delivers one result to each caller.
///
/// Delivery never waits on a caller: a response whose caller has gone away is
/// logged and dropped.
pub(crate) async fn execute<S, R, Rsp>(
    service: S,
    endpoint: String,
    requests: Vec<PendingRequest<R, Rsp>>,
) -> FlushSummary
where
    S: Service<BatchRequest<R>, Response = BatchResponse<Rsp>>,
    S::Error: Into<BoxError>,
{
    let size = requests.len();

    if requests.is_empty() {
        tracing::trace!(%endpoint, "flushed batch is empty, skipping downstream call");

        return FlushSummary {
            endpoint,
            size,
            delivered: 0,
            dropped: 0,
        };
    }

    let mut items = Vec::with_capacity(size);
    let mut waiters = Vec::with_capacity(size);

    for pending in requests {
        items.push(BatchItem {
            id: pending.id,
            request: pending.request,
        });
        waiters.push(Waiter {
            id: pending.id,
            tx: pending.tx,
            deadline: pending.deadline,
            span: pending.span,
        });
    }

    let ids: Vec<RequestId> = waiters.iter().map(|waiter| waiter.id).collect();
    let batch = BatchRequest {
        endpoint: endpoint.clone(),
        items,
    };

    tracing::trace!(%endpoint, batch_size = size, "sending batch downstream");

    let results = match service.oneshot(batch).await {
        Ok(response) => demultiplex(&endpoint, &ids, response),
        Err(error) => {
            let error = ServiceError::new(error.into());
            tracing::debug!(?error, %endpoint, batch_size = size, "batch execution failed");

            ids.iter()
                .map(|_| Err(BatchError::from(error.clone())))
                .collect()
        }
    };

    deliver(endpoint, waiters, results)
}

/// Matches the downstream response to the batch's request ids.
///
/// Returns one result per id, in the same order as `ids`.
pub(crate) fn demultiplex<Rsp>(
    endpoint: &str,
    ids: &[RequestId],
    response: BatchResponse<Rsp>,
) -> Vec<Result<Rsp, BatchError>> {
    match response {
        BatchResponse::ById(mut responses) => {
            let results = ids
                .iter()
                .map(|&id| {
                    responses
                        .remove(&id)
                        .ok_or(BatchError::MissingResponse { id })
                })
                .collect();

            if !responses.is_empty() {
                tracing::warn!(
                    endpoint,
                    unknown_ids = responses.len(),
                    "downstream batch response has entries for unknown request ids",
                );
            }

            results
        }

        BatchResponse::Positional(responses) => {
            if responses.len() != ids.len() {
                tracing::warn!(
                    endpoint,
                    expected = ids.len(),
                    received = responses.len(),
                    "downstream batch response has the wrong number of entries",
                );
            }

            let mut responses = responses.into_iter();

            ids.iter()
                .map(|&id| responses.next().ok_or(BatchError::MissingResponse { id }))
                .collect()
        }
    }
}

fn deliver<Rsp>(
    endpoint: String,
    waiters: Vec<Waiter<Rsp>>,
    results: Vec<Result<Rsp, BatchError>>,
) -> FlushSummary {
    let size = waiters.len();
    let mut delivered = 0;
    let mut dropped = 0;

    for (waiter, result) in waiters.into_iter().zip(results) {
        match waiter.tx.send(result) {
            Ok(()) => delivered += 1,
            Err(_unclaimed) => {
                dropped += 1;

                let _entered = waiter.span.enter();
                tracing::warn!(
                    id = %waiter.id,
                    %endpoint,
                    past_deadline = Instant::now() >= waiter.deadline,
                    "dropping batch response: the caller is no longer waiting for it",
                );
            }
        }
    }

    FlushSummary {
        endpoint,
        size,
        delivered,
        dropped,
    }
}
