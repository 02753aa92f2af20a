use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::Error;
use crate::Result;

/// URI scheme selecting the etcd v3 backend, e.g. `etcd:http://host:2379`
pub const ETCD_SCHEME: &str = "etcd:";

/// URI scheme selecting the in-process memory backend, e.g. `mem:local`
pub const MEMORY_SCHEME: &str = "mem:";

/// Where the status store keeps its state and how long a round trip may take
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    /// Backend URI. `etcd:` accepts several comma-separated endpoints.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per round-trip timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Resolved backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEndpoint {
    /// etcd endpoints with the `etcd:` scheme stripped
    Etcd(Vec<String>),
    Memory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "backend connect timeout must be > 0".to_string(),
            )));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "backend request timeout must be > 0".to_string(),
            )));
        }

        self.endpoint()?;
        Ok(())
    }

    /// Parses [`Self::uri`] into a backend selection.
    ///
    /// `etcd:http://host:2379` becomes `http://host:2379`; every endpoint
    /// must be an absolute http(s) URL.
    pub fn endpoint(&self) -> Result<BackendEndpoint> {
        let uri = self.uri.trim();

        if let Some(rest) = uri.strip_prefix(ETCD_SCHEME) {
            let mut endpoints = Vec::new();
            for raw in rest.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let parsed = Url::parse(raw).map_err(|e| {
                    Error::Config(ConfigError::Message(format!(
                        "Could not create URI from {raw:?}: {e}"
                    )))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(Error::Config(ConfigError::Message(format!(
                        "etcd endpoint {raw:?} must use http or https"
                    ))));
                }
                endpoints.push(raw.to_string());
            }

            if endpoints.is_empty() {
                return Err(Error::Config(ConfigError::Message(format!(
                    "etcd URI {uri:?} names no endpoints"
                ))));
            }
            return Ok(BackendEndpoint::Etcd(endpoints));
        }

        if uri.starts_with(MEMORY_SCHEME) {
            return Ok(BackendEndpoint::Memory);
        }

        Err(Error::Config(ConfigError::Message(format!(
            "Unsupported status store URI {uri:?}, expected {ETCD_SCHEME} or {MEMORY_SCHEME}"
        ))))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_uri() -> String {
    "etcd:http://127.0.0.1:2379".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
