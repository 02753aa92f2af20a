use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Credentials encryption and key layout
#[derive(Serialize, Deserialize, Clone)]
pub struct CredentialsConfig {
    /// Operator secret the AES key is derived from (SHA-256)
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Leading key segment, credentials live under `<namespace>.credentials.`
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            namespace: default_namespace(),
        }
    }
}

impl CredentialsConfig {
    pub fn validate(&self) -> Result<()> {
        if !crate::is_valid_namespace(&self.namespace) {
            return Err(Error::Config(ConfigError::Message(format!(
                "credentials namespace {:?} must be lowercase alphanumeric",
                self.namespace
            ))));
        }

        if matches!(&self.encryption_key, Some(k) if k.is_empty()) {
            return Err(Error::Config(ConfigError::Message(
                "credentials encryption key must not be empty".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_namespace() -> String {
    "secure".to_string()
}
