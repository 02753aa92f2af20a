use async_trait::async_trait;
use etcd_client::Client;
use etcd_client::Compare as EtcdCompare;
use etcd_client::CompareOp;
use etcd_client::ConnectOptions;
use etcd_client::DeleteOptions;
use etcd_client::EventType;
use etcd_client::GetOptions;
use etcd_client::KvClient;
use etcd_client::Txn as EtcdTxn;
use etcd_client::TxnOp as EtcdTxnOp;
use etcd_client::WatchClient;
use etcd_client::WatchOptions;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::BackendEvent;
use super::BackendEventKind;
use super::BackendWatchStream;
use super::Compare;
use super::KeyValue;
use super::KvBackend;
use super::Txn;
use super::TxnOp;
use super::WatchTarget;
use crate::BackendConfig;
use crate::BackendError;
use crate::BackendResult;

/// etcd v3 backend.
///
/// One client connection is shared by all operations; the generated
/// sub-clients are cheap channel clones, so a call only holds the lock
/// long enough to clone its client. [`KvBackend::close`] drops the clients;
/// the connection is released once calls already in flight finish.
pub struct EtcdKvBackend {
    clients: RwLock<Option<EtcdClients>>,
}

struct EtcdClients {
    kv: KvClient,
    watch: WatchClient,
}

impl std::fmt::Debug for EtcdKvBackend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EtcdKvBackend")
            .field("closed", &self.clients.read().is_none())
            .finish_non_exhaustive()
    }
}

impl EtcdKvBackend {
    /// Opens the connection to the given endpoints (scheme already stripped)
    pub async fn connect(
        endpoints: Vec<String>,
        config: &BackendConfig,
    ) -> BackendResult<Self> {
        let options = ConnectOptions::new()
            .with_connect_timeout(config.connect_timeout())
            .with_timeout(config.request_timeout());

        let client = Client::connect(endpoints.clone(), Some(options))
            .await
            .map_err(BackendError::rpc)?;
        info!(?endpoints, "connected to etcd");

        Ok(Self {
            clients: RwLock::new(Some(EtcdClients {
                kv: client.kv_client(),
                watch: client.watch_client(),
            })),
        })
    }

    fn kv(&self) -> BackendResult<KvClient> {
        self.clients
            .read()
            .as_ref()
            .map(|clients| clients.kv.clone())
            .ok_or(BackendError::Closed)
    }

    fn watch_client(&self) -> BackendResult<WatchClient> {
        self.clients
            .read()
            .as_ref()
            .map(|clients| clients.watch.clone())
            .ok_or(BackendError::Closed)
    }
}

fn to_key_value(kv: &etcd_client::KeyValue) -> BackendResult<KeyValue> {
    Ok(KeyValue {
        key: decode(kv.key())?,
        value: decode(kv.value())?,
        version: kv.version(),
    })
}

fn decode(bytes: &[u8]) -> BackendResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| BackendError::Encoding(e.to_string()))
}

fn to_etcd_compare(compare: Compare) -> EtcdCompare {
    match compare {
        Compare::VersionEquals { key, version } => {
            EtcdCompare::version(key, CompareOp::Equal, version)
        }
        Compare::ValueEquals { key, value } => EtcdCompare::value(key, CompareOp::Equal, value),
    }
}

fn to_etcd_op(op: TxnOp) -> EtcdTxnOp {
    match op {
        TxnOp::Put { key, value } => EtcdTxnOp::put(key, value, None),
        TxnOp::Delete { key } => EtcdTxnOp::delete(key, None),
        TxnOp::DeletePrefix { prefix } => {
            EtcdTxnOp::delete(prefix, Some(DeleteOptions::new().with_prefix()))
        }
    }
}

fn to_backend_event(event: &etcd_client::Event) -> Option<BackendResult<BackendEvent>> {
    let kv = event.kv()?;
    Some(decode_event(event.event_type(), kv, event.prev_kv()))
}

fn decode_event(
    event_type: EventType,
    kv: &etcd_client::KeyValue,
    prev_kv: Option<&etcd_client::KeyValue>,
) -> BackendResult<BackendEvent> {
    let key = decode(kv.key())?;
    let prev_value = prev_kv.map(|p| decode(p.value())).transpose()?;
    let (kind, value) = match event_type {
        EventType::Put => (BackendEventKind::Put, Some(decode(kv.value())?)),
        EventType::Delete => (BackendEventKind::Delete, None),
    };
    Ok(BackendEvent {
        kind,
        key,
        value,
        prev_value,
    })
}

#[async_trait]
impl KvBackend for EtcdKvBackend {
    async fn get(
        &self,
        key: &str,
    ) -> BackendResult<Option<KeyValue>> {
        let response = self.kv()?.get(key, None).await.map_err(BackendError::rpc)?;
        response.kvs().first().map(to_key_value).transpose()
    }

    async fn get_prefix(
        &self,
        prefix: &str,
    ) -> BackendResult<Vec<KeyValue>> {
        let response = self
            .kv()?
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(BackendError::rpc)?;
        response.kvs().iter().map(to_key_value).collect()
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> BackendResult<()> {
        self.kv()?.put(key, value, None).await.map_err(BackendError::rpc)?;
        Ok(())
    }

    async fn delete(
        &self,
        key: &str,
    ) -> BackendResult<()> {
        self.kv()?.delete(key, None).await.map_err(BackendError::rpc)?;
        Ok(())
    }

    async fn delete_prefix(
        &self,
        prefix: &str,
    ) -> BackendResult<()> {
        self.kv()?
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(BackendError::rpc)?;
        Ok(())
    }

    async fn txn(
        &self,
        txn: Txn,
    ) -> BackendResult<bool> {
        txn.check_overlaps()?;
        let request = EtcdTxn::new()
            .when(txn.when.into_iter().map(to_etcd_compare).collect::<Vec<_>>())
            .and_then(txn.then.into_iter().map(to_etcd_op).collect::<Vec<_>>());

        let response = self.kv()?.txn(request).await.map_err(BackendError::rpc)?;
        Ok(response.succeeded())
    }

    async fn watch(
        &self,
        target: WatchTarget,
    ) -> BackendResult<BackendWatchStream> {
        let mut client = self.watch_client()?;
        let mut options = WatchOptions::new().with_prev_key();
        if let WatchTarget::Prefix(_) = target {
            options = options.with_prefix();
        }

        let (mut watcher, mut stream) = client
            .watch(target.as_str(), Some(options))
            .await
            .map_err(BackendError::rpc)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Consumer went away
                    _ = sender.closed() => break,

                    message = stream.message() => match message {
                        Ok(Some(response)) => {
                            for event in response.events() {
                                let Some(event) = to_backend_event(event) else {
                                    continue;
                                };
                                if sender.send(event).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => {
                            debug!(watch_target = ?target, "etcd watch stream completed");
                            break;
                        }
                        Err(e) => {
                            if sender.send(Err(BackendError::rpc(e))).is_err() {
                                break;
                            }
                        }
                    },
                }
            }

            if let Err(e) = watcher.cancel().await {
                warn!(watch_target = ?target, "failed to cancel etcd watch: {:?}", e);
            }
        });

        Ok(receiver)
    }

    async fn close(&self) -> BackendResult<()> {
        if self.clients.write().take().is_some() {
            info!("etcd backend closed");
        }
        Ok(())
    }
}
