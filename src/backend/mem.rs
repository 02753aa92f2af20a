use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use super::BackendEvent;
use super::BackendEventKind;
use super::BackendWatchStream;
use super::Compare;
use super::KeyValue;
use super::KvBackend;
use super::Txn;
use super::TxnOp;
use super::WatchTarget;
use crate::BackendError;
use crate::BackendResult;

#[derive(Debug, Clone)]
struct Versioned {
    value: String,
    version: i64,
    mod_revision: i64,
}

#[derive(Debug)]
struct MemWatcher {
    target: WatchTarget,
    sender: mpsc::UnboundedSender<BackendResult<BackendEvent>>,
}

#[derive(Debug, Default)]
struct MemState {
    data: BTreeMap<String, Versioned>,
    // Store-wide revision, bumped once per mutating request
    revision: i64,
    watchers: Vec<MemWatcher>,
}

/// In-process linearizable backend.
///
/// Every mutation takes one write lock, so transactions are atomic and
/// watchers observe events in revision order. Versions follow etcd: a key is
/// created at version 1, each put increments it, and delete resets it to 0.
#[derive(Debug, Default)]
pub struct MemKvBackend {
    state: RwLock<MemState>,
    closed: AtomicBool,
}

impl MemKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current store-wide revision
    pub fn revision(&self) -> i64 {
        self.state.read().revision
    }

    /// Number of live watch streams
    pub fn watcher_count(&self) -> usize {
        let mut state = self.state.write();
        state.watchers.retain(|w| !w.sender.is_closed());
        state.watchers.len()
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }
}

impl MemState {
    fn holds(
        &self,
        compare: &Compare,
    ) -> bool {
        match compare {
            Compare::VersionEquals { key, version } => {
                self.data.get(key).map(|v| v.version).unwrap_or(0) == *version
            }
            Compare::ValueEquals { key, value } => {
                self.data.get(key).map(|v| &v.value == value).unwrap_or(false)
            }
        }
    }

    fn put(
        &mut self,
        key: &str,
        value: &str,
    ) {
        let revision = self.revision;
        let prev = self.data.get(key).cloned();
        let version = prev.as_ref().map(|p| p.version).unwrap_or(0) + 1;
        self.data.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version,
                mod_revision: revision,
            },
        );
        trace!(key, version, revision, "mem put");
        self.notify(BackendEvent {
            kind: BackendEventKind::Put,
            key: key.to_string(),
            value: Some(value.to_string()),
            prev_value: prev.map(|p| p.value),
        });
    }

    fn delete(
        &mut self,
        key: &str,
    ) {
        if let Some(prev) = self.data.remove(key) {
            trace!(key, mod_revision = prev.mod_revision, "mem delete");
            self.notify(BackendEvent {
                kind: BackendEventKind::Delete,
                key: key.to_string(),
                value: None,
                prev_value: Some(prev.value),
            });
        }
    }

    fn delete_prefix(
        &mut self,
        prefix: &str,
    ) {
        let keys = self.keys_with_prefix(prefix);
        for key in keys {
            self.delete(&key);
        }
    }

    fn keys_with_prefix(
        &self,
        prefix: &str,
    ) -> Vec<String> {
        self.data
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn apply(
        &mut self,
        op: &TxnOp,
    ) {
        match op {
            TxnOp::Put { key, value } => self.put(key, value),
            TxnOp::Delete { key } => self.delete(key),
            TxnOp::DeletePrefix { prefix } => self.delete_prefix(prefix),
        }
    }

    /// Pushes the event to matching watchers and forgets closed ones
    fn notify(
        &mut self,
        event: BackendEvent,
    ) {
        self.watchers.retain(|w| {
            if w.target.matches(&event.key) {
                w.sender.send(Ok(event.clone())).is_ok()
            } else {
                !w.sender.is_closed()
            }
        });
    }
}

#[async_trait]
impl KvBackend for MemKvBackend {
    async fn get(
        &self,
        key: &str,
    ) -> BackendResult<Option<KeyValue>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state.data.get(key).map(|v| KeyValue {
            key: key.to_string(),
            value: v.value.clone(),
            version: v.version,
        }))
    }

    async fn get_prefix(
        &self,
        prefix: &str,
    ) -> BackendResult<Vec<KeyValue>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state
            .data
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: v.value.clone(),
                version: v.version,
            })
            .collect())
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> BackendResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        state.revision += 1;
        state.put(key, value);
        Ok(())
    }

    async fn delete(
        &self,
        key: &str,
    ) -> BackendResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        state.revision += 1;
        state.delete(key);
        Ok(())
    }

    async fn delete_prefix(
        &self,
        prefix: &str,
    ) -> BackendResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        state.revision += 1;
        state.delete_prefix(prefix);
        Ok(())
    }

    async fn txn(
        &self,
        txn: Txn,
    ) -> BackendResult<bool> {
        self.ensure_open()?;
        txn.check_overlaps()?;
        let mut state = self.state.write();

        if !txn.when.iter().all(|c| state.holds(c)) {
            debug!(compares = txn.when.len(), "mem txn preconditions failed");
            return Ok(false);
        }

        state.revision += 1;
        for op in &txn.then {
            state.apply(op);
        }
        Ok(true)
    }

    async fn watch(
        &self,
        target: WatchTarget,
    ) -> BackendResult<BackendWatchStream> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.write();
        state.watchers.push(MemWatcher { target, sender });
        Ok(receiver)
    }

    async fn close(&self) -> BackendResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Dropping the senders ends every open watch stream
            self.state.write().watchers.clear();
            debug!("mem backend closed");
        }
        Ok(())
    }
}
