use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Retry budget for optimistic-concurrency document updates
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    /// Attempts before giving up on a conflicting update
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lower bound of the random back-off (unit: milliseconds, inclusive)
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    /// Upper bound of the random back-off (unit: milliseconds, exclusive)
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(ConfigError::Message(
                "retry max_attempts must be >= 1".to_string(),
            )));
        }

        if self.backoff_min_ms >= self.backoff_max_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry backoff_min_ms {} must be < backoff_max_ms {}",
                self.backoff_min_ms, self.backoff_max_ms
            ))));
        }
        Ok(())
    }

    pub fn backoff_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.backoff_min_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

fn default_max_attempts() -> u32 {
    10
}
fn default_backoff_min_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    4000
}
