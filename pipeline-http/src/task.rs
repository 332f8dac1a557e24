//! The pipeline task that makes one HTTP call.

use pipeline_task::{TaskError, TaskResult};

use crate::{
    http_request_context, task_context, BatchCodec, Config, HttpClient, HttpRequest,
    RequestContext, TaskTimeout,
};

/// Fetches a value from an external adapter.
///
/// The response body becomes the task's value, as a string. A failed call
/// becomes a fault, so aggregation tasks can tolerate it.
#[derive(Clone, Debug)]
pub struct HttpTask {
    /// The call to make.
    pub request: HttpRequest,

    /// The task's own timeout setting.
    pub timeout: TaskTimeout,
}

impl HttpTask {
    /// Returns a task for `request`, without a timeout setting.
    pub fn new(request: HttpRequest) -> Self {
        HttpTask {
            request,
            timeout: TaskTimeout::Unset,
        }
    }

    /// Sets the task's own timeout.
    pub fn with_timeout(mut self, timeout: TaskTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the task inside `parent`, sending its request with `client`.
    pub async fn run<C>(
        &self,
        client: &HttpClient<C>,
        parent: &RequestContext,
        config: &Config,
    ) -> TaskResult
    where
        C: BatchCodec,
    {
        let task_ctx = task_context(parent, self.timeout);
        let ctx = http_request_context(&task_ctx, self.timeout, config);

        let response = client.send(self.request.clone(), &ctx).await;

        let body = match response.into_result() {
            Ok(body) => body,
            Err(error) => return TaskResult::fault(TaskError::Upstream(error.to_string())),
        };

        match String::from_utf8(body.to_vec()) {
            Ok(text) => TaskResult::value(text),
            Err(error) => TaskResult::fault(TaskError::InvalidValue(error.to_string())),
        }
    }
}
