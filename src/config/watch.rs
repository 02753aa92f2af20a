use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Watch delivery parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of each watch's event channel. A full channel makes the
    /// dispatcher wait for the consumer.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch event buffer size must be > 0".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_event_buffer_size() -> usize {
    128
}
