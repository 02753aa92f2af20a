//! Configuration management for the status store.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod backend;
mod credentials;
mod retry;
mod watch;
pub use backend::*;
pub use credentials::*;
pub use retry::*;
pub use watch::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Environment variable prefix for overrides, e.g. `DSS__BACKEND__URI`
const ENV_PREFIX: &str = "DSS";

/// Main configuration container for the status store components
///
/// Combines all section configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// Backend endpoint and round-trip limits
    #[serde(default)]
    pub backend: BackendConfig,
    /// Watch delivery parameters
    #[serde(default)]
    pub watch: WatchConfig,
    /// Retry budget for optimistic document updates
    #[serde(default)]
    pub retry: RetryConfig,
    /// Credentials encryption and namespace
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

impl Debug for StoreConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        // credentials hold the encryption secret
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("watch", &self.watch)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `DSS__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so further overrides can be applied via
    /// `with_override_config()`. Callers MUST call `validate()` before use.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("DSS__BACKEND__URI", "etcd:http://etcd:2379");
    /// let cfg = StoreConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    ///
    /// # Errors
    /// - Unsupported or malformed backend URI
    /// - Zero-sized watch buffers
    /// - Empty retry budgets or inverted back-off ranges
    /// - Malformed credentials namespace
    pub fn validate(self) -> Result<Self> {
        self.backend.validate()?;
        self.watch.validate()?;
        self.retry.validate()?;
        self.credentials.validate()?;
        Ok(self)
    }
}
