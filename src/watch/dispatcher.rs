use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::DssEvent;
use super::WatchHandle;
use super::WatchId;
use crate::metrics::ACTIVE_WATCHES;
use crate::metrics::WATCH_EVENTS;
use crate::BackendResult;
use crate::BackendWatchStream;
use crate::KvBackend;
use crate::WatchTarget;

/// Live registration state, owned by the dispatcher
#[derive(Debug)]
struct WatchRegistration {
    target: WatchTarget,
    cancel: CancellationToken,
}

/// Registry of active watches for one store instance.
///
/// The registry is a concurrent map, so `register`/`unwatch` may race
/// freely from any task.
#[derive(Debug)]
pub struct WatchDispatcher {
    registrations: Arc<DashMap<WatchId, WatchRegistration>>,
    shutdown: CancellationToken,
    event_buffer_size: usize,
}

impl WatchDispatcher {
    /// `shutdown` cancels every watch registered through this dispatcher
    pub fn new(
        event_buffer_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registrations: Arc::new(DashMap::new()),
            shutdown,
            event_buffer_size: event_buffer_size.max(1),
        }
    }

    /// Opens a backend watch and starts forwarding its events.
    pub async fn register(
        &self,
        backend: &dyn KvBackend,
        target: WatchTarget,
    ) -> BackendResult<WatchHandle> {
        let stream = backend.watch(target.clone()).await?;

        let id = WatchId::generate();
        let cancel = self.shutdown.child_token();
        let (sender, receiver) = mpsc::channel(self.event_buffer_size);

        self.registrations.insert(
            id.clone(),
            WatchRegistration {
                target: target.clone(),
                cancel: cancel.clone(),
            },
        );
        ACTIVE_WATCHES.inc();
        info!(watch_id = %id, watch_target = ?target, "Watch registered");

        let registrations = self.registrations.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            forward_events(&task_id, stream, sender, cancel).await;

            if registrations.remove(&task_id).is_some() {
                ACTIVE_WATCHES.dec();
            }
            debug!(watch_id = %task_id, "Watch forwarder stopped");
        });

        Ok(WatchHandle::new(id, receiver))
    }

    /// Closes the watch; unknown or already closed ids are ignored
    pub fn unwatch(
        &self,
        id: &WatchId,
    ) {
        match self.registrations.remove(id) {
            Some((_, registration)) => {
                registration.cancel.cancel();
                ACTIVE_WATCHES.dec();
                info!(watch_id = %id, watch_target = ?registration.target, "Watch closed");
            }
            None => trace!(watch_id = %id, "unwatch of unknown id ignored"),
        }
    }

    pub fn is_active(
        &self,
        id: &WatchId,
    ) -> bool {
        self.registrations.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.registrations.len()
    }

    /// Cancels and forgets every registration
    pub fn close_all(&self) {
        self.shutdown.cancel();
        let ids: Vec<WatchId> = self.registrations.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            self.unwatch(&id);
        }
    }
}

/// Moves events from the backend stream to the consumer channel until the
/// watch is cancelled, the consumer goes away, or the backend stream ends.
async fn forward_events(
    id: &WatchId,
    mut stream: BackendWatchStream,
    sender: mpsc::Sender<DssEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sender.closed() => break,
            next = stream.recv() => next,
        };

        match next {
            Some(Ok(event)) => {
                let Some(event) = DssEvent::from_backend(event) else {
                    trace!(watch_id = %id, "Unrecognised watch event dropped");
                    continue;
                };
                WATCH_EVENTS.with_label_values(&[event.kind.as_str()]).inc();

                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = sender.send(event) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
            // Stream errors do not end the watch
            Some(Err(e)) => warn!(watch_id = %id, "Watch stream error ignored: {}", e),
            None => {
                debug!(watch_id = %id, "Backend watch stream ended");
                break;
            }
        }
    }
}
