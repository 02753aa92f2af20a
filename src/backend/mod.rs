//! Key-value backend abstraction
//!
//! The status store delegates every coordination guarantee to a linearizable
//! key-value service. This module defines the narrow surface it needs from
//! such a service and two implementations:
//! - [`EtcdKvBackend`] - etcd v3 through the `etcd-client` crate
//! - [`MemKvBackend`] - in-process store with the same transaction and watch semantics

mod mem;
pub use mem::*;

#[cfg(feature = "etcd")]
mod etcd;
#[cfg(feature = "etcd")]
pub use etcd::*;


use std::collections::HashSet;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use crate::BackendError;
use crate::BackendResult;

/// A stored key with its per-key version (1 after creation, 0 means absent)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub version: i64,
}

/// Transaction precondition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// `version(key) == version`; version 0 asserts the key is absent
    VersionEquals { key: String, version: i64 },
    /// `value(key) == value`; never holds for an absent key
    ValueEquals { key: String, value: String },
}

/// Transaction mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: String },
    Delete { key: String },
    DeletePrefix { prefix: String },
}

/// Multi-key transaction: if every `when` holds, every `then` is applied
/// in order; otherwise nothing is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub when: Vec<Compare>,
    pub then: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(
        mut self,
        compares: impl IntoIterator<Item = Compare>,
    ) -> Self {
        self.when.extend(compares);
        self
    }

    pub fn and_then(
        mut self,
        ops: impl IntoIterator<Item = TxnOp>,
    ) -> Self {
        self.then.extend(ops);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.when.is_empty() && self.then.is_empty()
    }

    /// Rejects mutations that touch one key twice: a key may be put at most
    /// once and never inside a key or range the same transaction deletes.
    /// Deletes may overlap each other.
    pub fn check_overlaps(&self) -> BackendResult<()> {
        let mut puts = HashSet::new();
        for op in &self.then {
            if let TxnOp::Put { key, .. } = op {
                if !puts.insert(key.as_str()) {
                    return Err(BackendError::InvalidTxn(format!(
                        "key {key} is put more than once"
                    )));
                }
            }
        }

        for op in &self.then {
            let overlapping = match op {
                TxnOp::Put { .. } => None,
                TxnOp::Delete { key } => puts.get(key.as_str()).copied(),
                TxnOp::DeletePrefix { prefix } => {
                    puts.iter().find(|key| key.starts_with(prefix.as_str())).copied()
                }
            };
            if let Some(key) = overlapping {
                return Err(BackendError::InvalidTxn(format!(
                    "key {key} is both put and deleted"
                )));
            }
        }
        Ok(())
    }
}

impl Compare {
    pub fn absent(key: impl Into<String>) -> Self {
        Compare::VersionEquals {
            key: key.into(),
            version: 0,
        }
    }

    pub fn value(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Compare::ValueEquals {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl TxnOp {
    pub fn put(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }

    pub fn delete_prefix(prefix: impl Into<String>) -> Self {
        TxnOp::DeletePrefix {
            prefix: prefix.into(),
        }
    }
}

/// What a watch observes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    Key(String),
    Prefix(String),
}

impl WatchTarget {
    pub fn matches(
        &self,
        key: &str,
    ) -> bool {
        match self {
            WatchTarget::Key(k) => k == key,
            WatchTarget::Prefix(p) => key.starts_with(p.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WatchTarget::Key(k) | WatchTarget::Prefix(k) => k,
        }
    }
}

/// Backend change type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEventKind {
    Put,
    Delete,
}

/// Raw change notification as pushed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    pub kind: BackendEventKind,
    pub key: String,
    /// New value for PUT, `None` for DELETE
    pub value: Option<String>,
    /// Value before the change, if the key existed
    pub prev_value: Option<String>,
}

/// Push stream of one backend watch, in revision order.
///
/// Dropping the receiver closes the backend watch.
pub type BackendWatchStream = mpsc::UnboundedReceiver<BackendResult<BackendEvent>>;

/// Linearizable key-value service consumed by the status store.
///
/// Implementations must be safe for concurrent use; the store never
/// serializes calls on the client side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Returns the key with its version, `None` if absent
    async fn get(
        &self,
        key: &str,
    ) -> BackendResult<Option<KeyValue>>;

    /// Returns every key starting with `prefix`
    async fn get_prefix(
        &self,
        prefix: &str,
    ) -> BackendResult<Vec<KeyValue>>;

    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> BackendResult<()>;

    /// Deleting an absent key succeeds
    async fn delete(
        &self,
        key: &str,
    ) -> BackendResult<()>;

    async fn delete_prefix(
        &self,
        prefix: &str,
    ) -> BackendResult<()>;

    /// Commits the transaction; `Ok(false)` means a precondition failed
    async fn txn(
        &self,
        txn: Txn,
    ) -> BackendResult<bool>;

    async fn watch(
        &self,
        target: WatchTarget,
    ) -> BackendResult<BackendWatchStream>;

    /// Releases the connection; later calls fail with `BackendError::Closed`
    async fn close(&self) -> BackendResult<()>;
}
