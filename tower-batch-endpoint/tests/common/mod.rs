//! Shared downstream services for batch middleware tests.

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use futures::future::{ready, Ready};
use tower::Service;

use tower_batch_endpoint::{BatchRequest, BatchResponse, BoxError, EndpointKey};

/// A request with an endpoint key and a value the recorder doubles.
#[derive(Clone, Debug)]
pub struct Req {
    pub endpoint: &'static str,
    pub value: u64,
}

impl Req {
    pub fn new(endpoint: &'static str, value: u64) -> Self {
        Req { endpoint, value }
    }
}

impl EndpointKey for Req {
    fn endpoint(&self) -> String {
        self.endpoint.to_owned()
    }
}

/// A downstream batch service that records every batch it receives,
/// and answers each item with twice its value.
#[derive(Clone, Default)]
pub struct Recorder {
    batches: Arc<Mutex<Vec<(String, Vec<u64>)>>>,

    /// Answer in arrival order instead of by request id.
    positional: bool,
}

impl Recorder {
    pub fn positional() -> Self {
        Recorder {
            positional: true,
            ..Recorder::default()
        }
    }

    /// Returns the endpoint and values of every batch received so far.
    pub fn batches(&self) -> Vec<(String, Vec<u64>)> {
        self.batches.lock().expect("recorder mutex is not poisoned").clone()
    }

    /// Returns the values of every batch received so far, ordered by their first value.
    pub fn sorted_values(&self) -> Vec<Vec<u64>> {
        let mut values: Vec<Vec<u64>> = self
            .batches()
            .into_iter()
            .map(|(_endpoint, values)| values)
            .collect();
        values.sort();
        values
    }
}

impl Service<BatchRequest<Req>> for Recorder {
    type Response = BatchResponse<u64>;
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: BatchRequest<Req>) -> Self::Future {
        let values = batch.items.iter().map(|item| item.request.value).collect();
        self.batches
            .lock()
            .expect("recorder mutex is not poisoned")
            .push((batch.endpoint.clone(), values));

        let response = if self.positional {
            BatchResponse::Positional(
                batch
                    .items
                    .iter()
                    .map(|item| item.request.value * 2)
                    .collect(),
            )
        } else {
            BatchResponse::ById(
                batch
                    .items
                    .iter()
                    .map(|item| (item.id, item.request.value * 2))
                    .collect(),
            )
        };

        ready(Ok(response))
    }
}
