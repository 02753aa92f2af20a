//! Status Store Error Hierarchy
//!
//! Defines the error types for the coordination layer, categorized by the
//! layer that raises them: backend transport, store operations, optimistic
//! document updates and the credentials consumer.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for backend round trips
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result type for [`crate::DynamicStatusStore`] operations
pub type DssResult<T> = std::result::Result<T, DssError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Status store operation failures
    #[error(transparent)]
    Store(#[from] DssError),

    /// Optimistic document update failures
    #[error(transparent)]
    Update(#[from] UpdateError),

    /// Credentials layering failures
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

/// Failures reported by a [`crate::KvBackend`] implementation
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Transport or server side failure with source context
    #[error("Backend request failed: {source}")]
    Rpc {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Round trip exceeded the configured request timeout
    #[error("Backend request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller was cancelled while waiting for the backend
    #[error("Backend request cancelled")]
    Cancelled,

    /// The backend connection has been shut down
    #[error("Backend connection is closed")]
    Closed,

    /// Key or value bytes could not be decoded
    #[error("Backend returned undecodable data: {0}")]
    Encoding(String),

    /// Transaction mutations overlap; rejected before any precondition runs
    #[error("Invalid transaction: {0}")]
    InvalidTxn(String),
}

impl BackendError {
    pub fn rpc(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        BackendError::Rpc {
            source: Box::new(source),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DssError {
    /// Backend unreachable, timed out, undecodable or cancelled
    #[error("{context}")]
    Io {
        context: &'static str,
        #[source]
        source: BackendError,
    },

    /// At least one transaction precondition did not hold; nothing was applied
    #[error("DSS transaction failed - matches failed")]
    MatchFailed,
}

impl DssError {
    pub(crate) fn io(
        context: &'static str,
        source: BackendError,
    ) -> Self {
        DssError::Io { context, source }
    }

    /// True when a batch was rejected because of conflicting state
    pub fn is_match_failure(&self) -> bool {
        matches!(self, DssError::MatchFailed)
    }

    /// True when the operation was interrupted by cancellation or shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            DssError::Io {
                source: BackendError::Cancelled | BackendError::Closed,
                ..
            }
        )
    }
}

/// Outcome of one attempt against an optimistic-concurrency document store
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Someone else updated the document first; the attempt may be retried
    #[error("Conflicting update: {0}")]
    Conflict(String),

    /// Terminal failure, never retried
    #[error("Update failed: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every attempt in the budget hit a conflict
    #[error("Update operation failed after {attempts} attempts, due to conflicts.")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<UpdateError>,
    },

    /// Cancelled while backing off between attempts
    #[error("Update cancelled while backing off")]
    Cancelled,
}

impl UpdateError {
    pub fn failed(message: impl Into<String>) -> Self {
        UpdateError::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Maps a document-store HTTP status to an attempt outcome.
    ///
    /// 2xx is success, 409 is a retryable conflict, anything else is terminal.
    pub fn from_http_status(
        status: u16,
        body: impl Into<String>,
    ) -> std::result::Result<(), UpdateError> {
        match status {
            200..=299 => Ok(()),
            409 => Err(UpdateError::Conflict(body.into())),
            _ => Err(UpdateError::Failed {
                message: format!("unexpected HTTP status {status}: {}", body.into()),
                source: None,
            }),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, UpdateError::Conflict(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("Credentials store access failed: {0}")]
    Store(#[from] DssError),

    /// Ids become one dot-separated key segment
    #[error("Invalid credentials id {0:?}")]
    InvalidId(String),

    /// A credentials store needs an encryption key derived from a secret
    #[error("No credentials encryption key has been configured")]
    MissingEncryptionKey,

    #[error("Failed to encrypt credentials: {0}")]
    Encryption(String),

    #[error("Failed to decrypt credentials: {0}")]
    Decryption(String),

    #[error("Invalid last-updated timestamp {0:?}")]
    InvalidTimestamp(String),
}
