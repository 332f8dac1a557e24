//! Configuration for HTTP calls and request batching.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;


/// HTTP and request batching configuration.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Send batchable requests through the per-endpoint batch middleware.
    ///
    /// When this is `false`, every request is sent directly.
    pub batching_enabled: bool,

    /// The maximum number of requests in a batch.
    ///
    /// A batch is flushed as soon as it reaches this size.
    pub batch_size: usize,

    /// The maximum time a batch waits for more requests, after its first request.
    #[serde(with = "humantime_serde")]
    pub batch_timeout: Duration,

    /// The maximum number of batches executing at the same time.
    pub max_concurrent_flushes: usize,

    /// How long a batched request keeps waiting after its batch window closes.
    ///
    /// This also bounds each physical batch call.
    #[serde(with = "humantime_serde")]
    pub deadline_slack: Duration,

    /// The timeout for tasks that do not set their own timeout.
    ///
    /// Zero disables the default timeout.
    #[serde(with = "humantime_serde")]
    pub default_http_timeout: Duration,

    /// The largest response body accepted, in bytes.
    pub max_response_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batching_enabled: false,
            batch_size: 10,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            max_concurrent_flushes: 16,
            deadline_slack: tower_batch_endpoint::DEFAULT_DEADLINE_SLACK,
            default_http_timeout: DEFAULT_HTTP_TIMEOUT,
            max_response_bytes: 32 * 1024,
        }
    }
}

impl Config {
    /// Checks the batching settings.
    ///
    /// Settings are checked even when batching is disabled, so enabling it
    /// later can not expose an invalid config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        if self.batch_timeout.is_zero() {
            return Err(ConfigError::ZeroBatchTimeout);
        }

        Ok(())
    }
}

const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(100);

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);
