//! Routes each request through the batch middleware or the direct executor.

use std::{fmt, sync::Arc};

use chrono::Utc;
use reqwest::Method;

use tower_batch_endpoint::Batch;

use crate::{
    BatchCodec, Config, ConfigError, DirectExecutor, HttpBatchService, HttpError, HttpRequest,
    HttpResponse, JsonArrayCodec, RequestContext,
};

/// A predicate that decides whether a request may share a batch.
type Predicate = dyn Fn(&HttpRequest) -> bool + Send + Sync;

/// The batch middleware used by an [`HttpClient`].
type HttpBatch<C> = Batch<HttpBatchService<C>, HttpRequest, HttpResponse>;

/// The default batching predicate: only `POST` requests are batched.
pub fn is_batchable(request: &HttpRequest) -> bool {
    request.method == Method::POST
}

/// Sends pipeline HTTP requests, batching them when possible.
///
/// Every request gets an [`HttpResponse`] of the same shape, whether it was
/// batched or sent directly.
pub struct HttpClient<C = JsonArrayCodec> {
    direct: Arc<DirectExecutor>,

    /// The batch middleware, if batching is enabled.
    batch: Option<HttpBatch<C>>,

    is_batchable: Arc<Predicate>,
}

impl HttpClient<JsonArrayCodec> {
    /// Returns a client that sends every request directly.
    pub fn direct_only(direct: DirectExecutor) -> Self {
        HttpClient {
            direct: Arc::new(direct),
            batch: None,
            is_batchable: Arc::new(is_batchable),
        }
    }
}

impl<C> HttpClient<C>
where
    C: BatchCodec,
{
    /// Returns a client for `config`, that batches requests using `codec`
    /// if batching is enabled.
    pub fn from_config(config: &Config, codec: C) -> Result<Self, ConfigError> {
        config.validate()?;

        let direct = Arc::new(DirectExecutor::from_config(config));

        let batch = config.batching_enabled.then(|| {
            let service = HttpBatchService::new(codec, direct.clone(), config.deadline_slack);

            Batch::new(
                service,
                config.batch_size,
                config.max_concurrent_flushes,
                config.batch_timeout,
            )
            .with_deadline_slack(config.deadline_slack)
        });

        Ok(HttpClient {
            direct,
            batch,
            is_batchable: Arc::new(is_batchable),
        })
    }

    /// Replaces the predicate that decides which requests are batched.
    pub fn with_predicate<F>(mut self, is_batchable: F) -> Self
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        self.is_batchable = Arc::new(is_batchable);
        self
    }

    /// Returns the batch middleware, if batching is enabled.
    pub fn batch(&self) -> Option<&HttpBatch<C>> {
        self.batch.as_ref()
    }

    /// Returns the direct executor.
    pub fn direct(&self) -> &DirectExecutor {
        &self.direct
    }

    /// Sends `request`, and waits for its response or for `ctx` to be done.
    ///
    /// Batchable requests are admitted into their endpoint's batch. If `ctx`
    /// is done first, the request stays in its batch, and the response has
    /// an [`HttpError::TimedOut`] error.
    ///
    /// # Panics
    ///
    /// If `request` has an odd number of header elements. The panic happens
    /// in the caller, before the request can join a shared batch.
    pub async fn send(&self, request: HttpRequest, ctx: &RequestContext) -> HttpResponse {
        request.assert_headers_are_paired();

        let batch = match &self.batch {
            Some(batch) if (self.is_batchable)(&request) => batch,
            _ => return self.direct.send(&request, ctx).await,
        };

        let start = Utc::now();
        let result = batch.admit_until(request, ctx.done()).await;
        let finish = Utc::now();

        match result {
            Ok(mut response) => {
                response.start = start;
                response.finish = finish;
                response
            }
            Err(error) if error.is_cancelled() => {
                HttpResponse::failed(HttpError::TimedOut, start, finish)
            }
            Err(error) => HttpResponse::failed(error.into(), start, finish),
        }
    }
}

impl<C> Clone for HttpClient<C> {
    fn clone(&self) -> Self {
        HttpClient {
            direct: self.direct.clone(),
            batch: self.batch.clone(),
            is_batchable: self.is_batchable.clone(),
        }
    }
}

impl<C> fmt::Debug for HttpClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("direct", &self.direct)
            .field("batch", &self.batch)
            .finish()
    }
}
