//! Encrypted credentials on top of the status store
//!
//! A credential `ID` occupies the keys below `<namespace>.credentials.ID.`:
//!
//! ```text
//! secure.credentials.ID.username          encrypted
//! secure.credentials.ID.password          encrypted
//! secure.credentials.ID.token             encrypted
//! secure.credentials.ID.description
//! secure.credentials.ID.lastUpdated.time  RFC 3339
//! secure.credentials.ID.lastUpdated.user
//! ```
//!
//! Which secret keys are present decides the [`Credentials`] variant.

mod encryption;
pub use encryption::*;


use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use tracing::debug;
use tracing::info;

use crate::CredentialsConfig;
use crate::CredentialsError;
use crate::DssAction;
use crate::DynamicStatusStore;

const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const TOKEN: &str = "token";
const DESCRIPTION: &str = "description";
const LAST_UPDATED_TIME: &str = "lastUpdated.time";
const LAST_UPDATED_USER: &str = "lastUpdated.user";

/// Secret material of one credential
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Token { token: String },
    Username { username: String },
    UsernameToken { username: String, token: String },
    UsernamePassword { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Credentials::Token { .. } => f.debug_struct("Token").finish_non_exhaustive(),
            Credentials::Username { username } => {
                f.debug_struct("Username").field("username", username).finish()
            }
            Credentials::UsernameToken { username, .. } => f
                .debug_struct("UsernameToken")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::Username { username }
            | Credentials::UsernameToken { username, .. }
            | Credentials::UsernamePassword { username, .. } => Some(username),
            Credentials::Token { .. } => None,
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            Credentials::UsernamePassword { password, .. } => Some(password),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Credentials::Token { token } | Credentials::UsernameToken { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Chooses the variant from the secrets present.
    ///
    /// A token wins over a password; nothing is resolved without a token or
    /// a username.
    fn resolve(
        username: Option<String>,
        password: Option<String>,
        token: Option<String>,
    ) -> Option<Self> {
        match (username, password, token) {
            (Some(username), _, Some(token)) => {
                Some(Credentials::UsernameToken { username, token })
            }
            (None, _, Some(token)) => Some(Credentials::Token { token }),
            (Some(username), Some(password), None) => {
                Some(Credentials::UsernamePassword { username, password })
            }
            (Some(username), None, None) => Some(Credentials::Username { username }),
            (None, _, None) => None,
        }
    }

    fn secret_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Credentials::Token { token } => vec![(TOKEN, token)],
            Credentials::Username { username } => vec![(USERNAME, username)],
            Credentials::UsernameToken { username, token } => {
                vec![(USERNAME, username), (TOKEN, token)]
            }
            Credentials::UsernamePassword { username, password } => {
                vec![(USERNAME, username), (PASSWORD, password)]
            }
        }
    }
}

/// A credential together with its unencrypted metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsEntry {
    pub credentials: Credentials,
    pub description: Option<String>,
    pub last_updated_time: Option<DateTime<Utc>>,
    pub last_updated_user: Option<String>,
}

impl CredentialsEntry {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            description: None,
            last_updated_time: None,
            last_updated_user: None,
        }
    }

    pub fn with_description(
        mut self,
        description: impl Into<String>,
    ) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Stamps the entry as updated now by `user`
    pub fn updated_by(
        mut self,
        user: impl Into<String>,
    ) -> Self {
        self.last_updated_time = Some(Utc::now());
        self.last_updated_user = Some(user.into());
        self
    }
}

/// Credentials store layered on [`DynamicStatusStore`]
#[derive(Clone)]
pub struct CredentialsStore {
    store: DynamicStatusStore,
    encryption: Arc<dyn EncryptionService>,
    prefix: String,
}

impl fmt::Debug for CredentialsStore {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CredentialsStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl CredentialsStore {
    /// Builds the store with an AES key derived from `config.encryption_key`
    ///
    /// # Errors
    /// [`CredentialsError::MissingEncryptionKey`] when no secret is configured
    pub fn new(
        store: DynamicStatusStore,
        config: &CredentialsConfig,
    ) -> Result<Self, CredentialsError> {
        let secret = config
            .encryption_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(CredentialsError::MissingEncryptionKey)?;

        Ok(Self::with_encryption(
            store,
            &config.namespace,
            Arc::new(AesGcmEncryption::from_secret(secret)),
        ))
    }

    pub fn with_encryption(
        store: DynamicStatusStore,
        namespace: &str,
        encryption: Arc<dyn EncryptionService>,
    ) -> Self {
        Self {
            store,
            encryption,
            prefix: format!("{namespace}.credentials."),
        }
    }

    /// `<namespace>.credentials.`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn id_prefix(
        &self,
        id: &str,
    ) -> Result<String, CredentialsError> {
        if id.is_empty() || id.contains('.') || id.chars().any(char::is_whitespace) {
            return Err(CredentialsError::InvalidId(id.to_string()));
        }
        Ok(format!("{}{}.", self.prefix, id))
    }

    /// Returns the credential, `None` if no secret is stored for `id`
    pub async fn get_credentials(
        &self,
        id: &str,
    ) -> Result<Option<CredentialsEntry>, CredentialsError> {
        let id_prefix = self.id_prefix(id)?;
        let properties = self.store.get_prefix(&id_prefix).await?;
        self.decode_entry(&id_prefix, &properties)
    }

    /// Replaces everything stored for `id` in one transaction.
    ///
    /// Fields of the previous entry that the new one does not write are
    /// deleted key by key; a put may not overlap a deleted range in the
    /// same transaction.
    pub async fn set_credentials(
        &self,
        id: &str,
        entry: &CredentialsEntry,
    ) -> Result<(), CredentialsError> {
        let id_prefix = self.id_prefix(id)?;

        let mut writes = Vec::new();
        for (field, secret) in entry.credentials.secret_fields() {
            writes.push(DssAction::update(
                format!("{id_prefix}{field}"),
                self.encryption.encrypt(secret)?,
            ));
        }

        let metadata = [
            (DESCRIPTION, entry.description.clone()),
            (
                LAST_UPDATED_TIME,
                entry
                    .last_updated_time
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            ),
            (LAST_UPDATED_USER, entry.last_updated_user.clone()),
        ];
        for (field, value) in metadata {
            if let Some(value) = value {
                writes.push(DssAction::update(format!("{id_prefix}{field}"), value));
            }
        }

        let previous = self.store.get_prefix(&id_prefix).await?;
        let stale: Vec<DssAction> = {
            let rewritten: HashSet<&str> = writes.iter().map(DssAction::key).collect();
            previous
                .into_keys()
                .filter(|key| !rewritten.contains(key.as_str()))
                .map(DssAction::delete)
                .collect()
        };
        let actions: Vec<DssAction> = stale.into_iter().chain(writes).collect();

        self.store.perform_actions(&actions).await?;
        info!(credentials_id = id, "credentials stored");
        Ok(())
    }

    /// Removes every key of `id` with one prefix delete
    pub async fn delete_credentials(
        &self,
        id: &str,
    ) -> Result<(), CredentialsError> {
        let id_prefix = self.id_prefix(id)?;
        self.store.delete_prefix(&id_prefix).await?;
        info!(credentials_id = id, "credentials deleted");
        Ok(())
    }

    /// Every stored credential keyed by id.
    ///
    /// Keys that do not have the `<ns>.credentials.ID.field` shape and ids
    /// without a secret are skipped.
    pub async fn get_all_credentials(
        &self,
    ) -> Result<HashMap<String, CredentialsEntry>, CredentialsError> {
        let properties = self.store.get_prefix(&self.prefix).await?;

        let mut grouped: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (key, value) in properties {
            let Some(id) = credentials_id_of(&self.prefix, &key) else {
                debug!(key, "skipping malformed credentials key");
                continue;
            };
            let id = id.to_string();
            grouped.entry(id).or_default().insert(key, value);
        }

        let mut all = HashMap::with_capacity(grouped.len());
        for (id, properties) in grouped {
            let id_prefix = format!("{}{}.", self.prefix, id);
            if let Some(entry) = self.decode_entry(&id_prefix, &properties)? {
                all.insert(id, entry);
            }
        }
        Ok(all)
    }

    /// Shuts the underlying status store down
    pub async fn shutdown(&self) -> Result<(), CredentialsError> {
        self.store.shutdown().await?;
        Ok(())
    }

    fn decode_entry(
        &self,
        id_prefix: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Option<CredentialsEntry>, CredentialsError> {
        let field = |name: &str| properties.get(&format!("{id_prefix}{name}"));
        let secret = |name: &str| -> Result<Option<String>, CredentialsError> {
            field(name).map(|v| self.encryption.decrypt(v)).transpose()
        };

        let Some(credentials) =
            Credentials::resolve(secret(USERNAME)?, secret(PASSWORD)?, secret(TOKEN)?)
        else {
            return Ok(None);
        };

        let last_updated_time = field(LAST_UPDATED_TIME)
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| CredentialsError::InvalidTimestamp(raw.clone()))
            })
            .transpose()?;

        Ok(Some(CredentialsEntry {
            credentials,
            description: field(DESCRIPTION).cloned(),
            last_updated_time,
            last_updated_user: field(LAST_UPDATED_USER).cloned(),
        }))
    }
}

/// Id segment of `<prefix>ID.field`, `None` for any other shape
fn credentials_id_of<'a>(
    prefix: &str,
    key: &'a str,
) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    let (id, field) = rest.split_once('.')?;
    if id.is_empty() || field.is_empty() {
        return None;
    }
    Some(id)
}
