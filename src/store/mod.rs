//! Dynamic Status Store
//!
//! Coordination API shared by every worker of the orchestration platform:
//! plain reads and writes, single-key compare-and-swap, multi-key batch
//! transactions and change notifications. All coordination correctness is
//! delegated to the backend's transaction engine, so the store itself holds
//! no client-side locks and is safe to share across tasks.

mod action;
mod namespace;
pub use action::*;
pub use namespace::*;


use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::metrics::OPERATIONS;
use crate::metrics::OPERATION_FAILURES;
use crate::utils::ScopedTimer;
use crate::BackendEndpoint;
use crate::BackendError;
use crate::BackendResult;
use crate::Compare;
use crate::DssError;
use crate::DssResult;
use crate::KvBackend;
use crate::MemKvBackend;
use crate::StoreConfig;
use crate::Txn;
use crate::TxnOp;
use crate::WatchDispatcher;
use crate::WatchHandle;
use crate::WatchId;
use crate::WatchTarget;

struct StoreInner {
    backend: Arc<dyn KvBackend>,
    watches: WatchDispatcher,
    shutdown: CancellationToken,
    closed: AtomicBool,
    request_timeout: Duration,
}

/// Handle to the status store. Clones share one backend connection.
#[derive(Clone)]
pub struct DynamicStatusStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for DynamicStatusStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DynamicStatusStore")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .field("request_timeout", &self.inner.request_timeout)
            .field("watches", &self.inner.watches)
            .finish_non_exhaustive()
    }
}

impl DynamicStatusStore {
    /// Opens the backend named by `config.backend.uri`.
    ///
    /// # Errors
    /// - `Error::Config` for an unsupported or malformed URI
    /// - `Error::Store` when the backend cannot be reached
    pub async fn connect(config: &StoreConfig) -> crate::Result<Self> {
        let backend: Arc<dyn KvBackend> = match config.backend.endpoint()? {
            #[cfg(feature = "etcd")]
            BackendEndpoint::Etcd(endpoints) => Arc::new(
                crate::EtcdKvBackend::connect(endpoints, &config.backend)
                    .await
                    .map_err(|e| DssError::io("Could not connect to the status store", e))?,
            ),
            #[cfg(not(feature = "etcd"))]
            BackendEndpoint::Etcd(_) => {
                return Err(crate::Error::Config(::config::ConfigError::Message(
                    "etcd backend support is not enabled in this build".to_string(),
                )))
            }
            BackendEndpoint::Memory => Arc::new(MemKvBackend::new()),
        };

        Ok(Self::with_backend(backend, config))
    }

    /// Wraps an already connected backend
    pub fn with_backend(
        backend: Arc<dyn KvBackend>,
        config: &StoreConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let watches = WatchDispatcher::new(config.watch.event_buffer_size, shutdown.child_token());

        Self {
            inner: Arc::new(StoreInner {
                backend,
                watches,
                shutdown,
                closed: AtomicBool::new(false),
                request_timeout: config.backend.request_timeout(),
            }),
        }
    }

    /// Unconditional upsert
    pub async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> DssResult<()> {
        self.call("put", "Could not put key-value", self.inner.backend.put(key, value))
            .await
    }

    /// Upserts every entry in one transaction
    pub async fn put_all(
        &self,
        entries: &HashMap<String, String>,
    ) -> DssResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let txn = Txn::new().and_then(entries.iter().map(|(k, v)| TxnOp::put(k, v)));
        self.call("put_all", "Could not put key-values", self.inner.backend.txn(txn))
            .await?;
        Ok(())
    }

    /// Returns the value, `None` when the key is absent
    pub async fn get(
        &self,
        key: &str,
    ) -> DssResult<Option<String>> {
        let kv = self
            .call("get", "Could not retrieve key", self.inner.backend.get(key))
            .await?;
        Ok(kv.map(|kv| kv.value))
    }

    /// Returns every key starting with `prefix`; empty when nothing matches
    pub async fn get_prefix(
        &self,
        prefix: &str,
    ) -> DssResult<HashMap<String, String>> {
        let kvs = self
            .call(
                "get_prefix",
                "Could not retrieve key prefix",
                self.inner.backend.get_prefix(prefix),
            )
            .await?;
        Ok(kvs.into_iter().map(|kv| (kv.key, kv.value)).collect())
    }

    /// Deleting an absent key is a no-op
    pub async fn delete(
        &self,
        key: &str,
    ) -> DssResult<()> {
        self.call("delete", "Could not delete key", self.inner.backend.delete(key))
            .await
    }

    /// Deletes every key in one transaction
    pub async fn delete_all<I, K>(
        &self,
        keys: I,
    ) -> DssResult<()>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let txn = Txn::new().and_then(keys.into_iter().map(|key| TxnOp::delete(key)));
        if txn.is_empty() {
            return Ok(());
        }

        self.call("delete_all", "Could not delete keys", self.inner.backend.txn(txn))
            .await?;
        Ok(())
    }

    pub async fn delete_prefix(
        &self,
        prefix: &str,
    ) -> DssResult<()> {
        self.call(
            "delete_prefix",
            "Could not delete key prefix",
            self.inner.backend.delete_prefix(prefix),
        )
        .await
    }

    /// Compare-and-swap of a single key.
    ///
    /// Applies `new_value` iff the current value equals `old_value`, or, when
    /// `old_value` is `None`, iff the key does not exist. Returns whether the
    /// swap was applied.
    pub async fn put_swap(
        &self,
        key: &str,
        old_value: Option<&str>,
        new_value: &str,
    ) -> DssResult<bool> {
        let txn = Txn::new()
            .when([swap_precondition(key, old_value)])
            .and_then([TxnOp::put(key, new_value)]);
        self.swap("put_swap", txn).await
    }

    /// Like [`Self::put_swap`], and on success also writes every entry of
    /// `others` in the same transaction. The precondition gates only `key`,
    /// which must not appear in `others` (`BackendError::InvalidTxn`).
    pub async fn put_swap_with(
        &self,
        key: &str,
        old_value: Option<&str>,
        new_value: &str,
        others: &HashMap<String, String>,
    ) -> DssResult<bool> {
        let txn = Txn::new()
            .when([swap_precondition(key, old_value)])
            .and_then([TxnOp::put(key, new_value)])
            .and_then(others.iter().map(|(k, v)| TxnOp::put(k, v)));
        self.swap("put_swap_with", txn).await
    }

    async fn swap(
        &self,
        op: &'static str,
        txn: Txn,
    ) -> DssResult<bool> {
        let succeeded = self
            .call(op, "Put/Swap failed", self.inner.backend.txn(txn))
            .await?;
        debug!(op, succeeded, "swap completed");
        Ok(succeeded)
    }

    /// Registers a watch on one key
    pub async fn watch(
        &self,
        key: &str,
    ) -> DssResult<WatchHandle> {
        self.register_watch(WatchTarget::Key(key.to_string())).await
    }

    /// Registers a watch on every key starting with `prefix`
    pub async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> DssResult<WatchHandle> {
        self.register_watch(WatchTarget::Prefix(prefix.to_string())).await
    }

    async fn register_watch(
        &self,
        target: WatchTarget,
    ) -> DssResult<WatchHandle> {
        self.call(
            "watch",
            "Could not register watch",
            self.inner.watches.register(self.inner.backend.as_ref(), target),
        )
        .await
    }

    /// Closes the watch; unknown or already closed ids are ignored
    pub fn unwatch(
        &self,
        id: &WatchId,
    ) {
        self.inner.watches.unwatch(id);
    }

    /// Number of currently registered watches
    pub fn active_watches(&self) -> usize {
        self.inner.watches.active_count()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Cancels in-flight calls, closes every watch and the backend.
    ///
    /// Runs once; later calls return immediately. Operations issued after
    /// shutdown fail with [`BackendError::Closed`] as the cause.
    pub async fn shutdown(&self) -> DssResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("shutting down status store");
        self.inner.shutdown.cancel();
        self.inner.watches.close_all();

        self.inner
            .backend
            .close()
            .await
            .map_err(|e| DssError::io("Could not close the status store", e))
    }

    /// Runs one backend round trip with timing, metrics, cancellation and
    /// the request timeout applied.
    pub(crate) async fn call<T, F>(
        &self,
        op: &'static str,
        context: &'static str,
        request: F,
    ) -> DssResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        let _timer = ScopedTimer::new(op);
        OPERATIONS.with_label_values(&[op]).inc();

        match self.guard(request).await {
            Ok(value) => Ok(value),
            Err(e) => {
                OPERATION_FAILURES.with_label_values(&[op]).inc();
                warn!(op, "{}: {}", context, e);
                Err(DssError::io(context, e))
            }
        }
    }

    async fn guard<T, F>(
        &self,
        request: F,
    ) -> BackendResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }

        let timeout = self.inner.request_timeout;
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(BackendError::Cancelled),
            result = tokio::time::timeout(timeout, request) => {
                result.unwrap_or(Err(BackendError::Timeout(timeout)))
            }
        }
    }
}

/// Version 0 when the key must be absent, value equality otherwise
pub(crate) fn swap_precondition(
    key: &str,
    old_value: Option<&str>,
) -> Compare {
    match old_value {
        Some(old) => Compare::value(key, old),
        None => Compare::absent(key),
    }
}
