//! Request cancellation, deadlines, and timeout precedence.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::Config;


/// The cancellation scope and deadline of one call.
///
/// Derived contexts share their parent's cancellation, and can only shorten
/// its deadline. Cancelling a derived context does not cancel its parent.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Returns a context with no deadline, that is only done when cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a child context that is done after `timeout`, or when this context is done.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a child context that is done at `deadline`, or when this context is done.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };

        RequestContext {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Returns the instant this context times out, if it has a deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context, and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` if this context, or one of its parents, was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `true` if this context was cancelled, or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Waits until this context is cancelled, or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

/// A task's own timeout setting.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TaskTimeout {
    /// The task has no timeout. The default HTTP timeout applies.
    #[default]
    Unset,

    /// The task timeout was explicitly set to zero: no timeout applies at all.
    Disabled,

    /// The task times out after this duration.
    Set(Duration),
}

impl TaskTimeout {
    /// Converts an optional task timeout, where an explicit zero disables timeouts.
    pub fn from_option(timeout: Option<Duration>) -> Self {
        match timeout {
            None => TaskTimeout::Unset,
            Some(timeout) if timeout.is_zero() => TaskTimeout::Disabled,
            Some(timeout) => TaskTimeout::Set(timeout),
        }
    }

    /// Returns `true` if the task set a timeout, including an explicit zero.
    pub fn is_set(&self) -> bool {
        *self != TaskTimeout::Unset
    }
}

/// Returns the context a task runs in, applying the task's own timeout.
pub fn task_context(parent: &RequestContext, timeout: TaskTimeout) -> RequestContext {
    match timeout {
        TaskTimeout::Set(timeout) => parent.with_timeout(timeout),
        TaskTimeout::Unset | TaskTimeout::Disabled => parent.clone(),
    }
}

/// Returns the context for a task's HTTP request.
///
/// The configured default HTTP timeout only applies when the task has no
/// timeout setting, and the default is greater than zero. A task timeout has
/// already been applied by [`task_context`], and an explicit zero must not be
/// replaced by the default.
pub fn http_request_context(
    ctx: &RequestContext,
    timeout: TaskTimeout,
    config: &Config,
) -> RequestContext {
    if !timeout.is_set() && !config.default_http_timeout.is_zero() {
        ctx.with_timeout(config.default_http_timeout)
    } else {
        ctx.clone()
    }
}
