//! Bounded retry with randomized back-off for optimistic-concurrency updates
//!
//! Document stores such as CouchDB reject an update whose revision is stale
//! with a conflict. [`RetryableUpdateProcessor`] re-runs the whole
//! read-modify-write attempt after a random pause until it succeeds, fails
//! for another reason, or the attempt budget is spent.

#[cfg(test)]
mod retry_test;

#[cfg(test)]
use mockall::automock;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::metrics::UPDATE_CONFLICTS;
use crate::RetryConfig;
use crate::UpdateError;

/// Default attempt budget before a conflicting update gives up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Decides how long to pause between two attempts
#[cfg_attr(test, automock)]
pub trait BackoffCalculator: Send + Sync + 'static {
    fn backoff_delay(&self) -> Duration;
}

/// Uniformly random delay in `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomBackoff {
    min: Duration,
    max: Duration,
}

impl RandomBackoff {
    pub fn new(
        min: Duration,
        max: Duration,
    ) -> Self {
        Self { min, max }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let (min, max) = config.backoff_range();
        Self::new(min, max)
    }
}

impl Default for RandomBackoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl BackoffCalculator for RandomBackoff {
    fn backoff_delay(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..self.max)
    }
}

/// Retries an update attempt while it reports [`UpdateError::Conflict`]
#[derive(Clone)]
pub struct RetryableUpdateProcessor {
    max_attempts: u32,
    backoff: Arc<dyn BackoffCalculator>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RetryableUpdateProcessor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RetryableUpdateProcessor")
            .field("max_attempts", &self.max_attempts)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for RetryableUpdateProcessor {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryableUpdateProcessor {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Arc::new(RandomBackoff::from_config(config)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_attempts(
        mut self,
        max_attempts: u32,
    ) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(
        mut self,
        backoff: Arc<dyn BackoffCalculator>,
    ) -> Self {
        self.backoff = backoff;
        self
    }

    /// Cancelling `token` aborts a running loop with [`UpdateError::Cancelled`]
    pub fn with_cancellation(
        mut self,
        token: CancellationToken,
    ) -> Self {
        self.cancel = token;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `operation` until it succeeds.
    ///
    /// A conflict pauses for one back-off delay and tries again. Any other
    /// error is returned at once. After `max_attempts` conflicts the last one
    /// is wrapped in [`UpdateError::RetriesExhausted`]; no pause follows the
    /// final attempt.
    pub async fn run<F, Fut, T>(
        &self,
        mut operation: F,
    ) -> Result<T, UpdateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpdateError>>,
    {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            attempt += 1;

            let conflict = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "update succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_conflict() => e,
                Err(e) => return Err(e),
            };
            UPDATE_CONFLICTS.inc();

            if attempt >= self.max_attempts {
                let err = UpdateError::RetriesExhausted {
                    attempts: self.max_attempts,
                    last: Box::new(conflict),
                };
                warn!("{}", err);
                return Err(err);
            }

            let delay = self.backoff.backoff_delay();
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Clashing update detected. Backing off before retrying."
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(attempt, "Cancelled during a back-off delay");
                    return Err(UpdateError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
