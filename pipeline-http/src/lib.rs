//! HTTP calls for external-data pipeline tasks.
//!
//! Tasks describe an outbound call as an [`HttpRequest`], and always get back
//! an [`HttpResponse`] of the same shape, whichever path served it:
//!
//! - the [`DirectExecutor`] makes one physical HTTP request per task, and
//! - the batch path admits batchable requests into a per-endpoint
//!   [`tower_batch_endpoint::Batch`], which sends every request for the same
//!   endpoint in one physical call, using a [`BatchCodec`] to build the call
//!   and split its response.
//!
//! The [`HttpClient`] chooses the path for each request, and [`HttpTask`]
//! turns its response into a [`pipeline_task::TaskResult`].
//!
//! ## Timeouts
//!
//! Requests are bounded by a [`RequestContext`], the combination of a
//! cancellation token and an optional deadline. A task's own timeout is applied
//! by [`task_context`]. The configured default HTTP timeout is only applied
//! when the task has no timeout at all, see [`http_request_context`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod batch;
mod client;
mod codec;
mod config;
mod context;
mod direct;
mod error;
mod request;
mod task;

pub use tower_batch_endpoint::BoxError;

pub use self::{
    batch::HttpBatchService,
    client::{is_batchable, HttpClient},
    codec::{BatchCodec, JsonArrayCodec},
    config::Config,
    context::{http_request_context, task_context, RequestContext, TaskTimeout},
    direct::{best_effort_extract_error, status_code_group, DirectExecutor},
    error::{ConfigError, HttpError},
    request::{endpoint_url, HttpRequest, HttpResponse},
    task::HttpTask,
};
