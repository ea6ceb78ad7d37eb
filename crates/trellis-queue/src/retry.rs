use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{QueueError, QueueResult};

/// Backoff parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

/// Re-runs failing work with a delay that doubles on each consecutive
/// failure, up to a cap.
///
/// Every call to [`run`](Self::run) starts from the minimum interval, so a
/// success resets the backoff.
#[derive(Clone, Debug, Default)]
pub struct ExponentialRetry {
    config: RetryConfig,
}

impl ExponentialRetry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(31);
        self.config
            .min_interval
            .saturating_mul(1u32 << shift)
            .min(self.config.max_interval)
    }

    /// Run `work` until it succeeds.
    ///
    /// Fatal errors and errors matched by `excluded` are returned at once.
    /// Everything else is retried, until `max_attempts` is reached.
    pub async fn run<T, F, Fut, X>(&self, name: &str, mut work: F, excluded: X) -> QueueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueueResult<T>>,
        X: Fn(&QueueError) -> bool,
    {
        let mut failures = 0u32;
        loop {
            let err = match work().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            failures += 1;

            if err.is_fatal() || excluded(&err) {
                error!(name, error = %err, "not retrying");
                return Err(err);
            }
            if self.config.max_attempts.is_some_and(|max| failures >= max) {
                error!(name, failures, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = self.delay_for(failures);
            warn!(name, failures, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            tokio::time::sleep(delay).await;
        }
    }
}
