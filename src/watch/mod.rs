//! Change notifications for keys and key prefixes
//!
//! Backend PUT/DELETE events are translated into higher level
//! [`EventKind::New`], [`EventKind::Modified`] and [`EventKind::Delete`]
//! notifications and pushed into a bounded channel owned by the consumer.
//!
//! ```text
//! KvBackend::watch() -> BackendWatchStream ──> forward task (1 per watch)
//!                                                   │ translate + send().await
//!                                                   ▼
//!                                       WatchHandle::recv() (consumer)
//! ```
//!
//! Delivery is ordered per watch, which preserves backend revision order
//! for every key. A full channel suspends the forward task until the
//! consumer catches up; no event is dropped for backpressure.

mod dispatcher;
pub use dispatcher::*;


use std::fmt;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::BackendEvent;
use crate::BackendEventKind;

/// Opaque watch identifier, unique for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchId(String);

impl WatchId {
    pub(crate) fn generate() -> Self {
        WatchId(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// PUT of a key that did not exist
    New,
    /// PUT over an existing value
    Modified,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::New => "new",
            EventKind::Modified => "modified",
            EventKind::Delete => "delete",
        }
    }
}

/// A change delivered to a watch consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DssEvent {
    pub key: String,
    pub kind: EventKind,
    /// Value before the change; set for MODIFIED and DELETE
    pub old_value: Option<String>,
    /// Value after the change; set for NEW and MODIFIED
    pub new_value: Option<String>,
}

impl DssEvent {
    /// Applies the dispatch rule. Returns `None` for events that cannot be
    /// classified, which are dropped.
    pub(crate) fn from_backend(event: BackendEvent) -> Option<Self> {
        let BackendEvent {
            kind,
            key,
            value,
            prev_value,
        } = event;

        match kind {
            BackendEventKind::Put => {
                let new_value = Some(value?);
                let kind = if prev_value.is_some() {
                    EventKind::Modified
                } else {
                    EventKind::New
                };
                Some(DssEvent {
                    key,
                    kind,
                    old_value: prev_value,
                    new_value,
                })
            }
            BackendEventKind::Delete => Some(DssEvent {
                key,
                kind: EventKind::Delete,
                old_value: prev_value,
                new_value: None,
            }),
        }
    }
}

/// Receiving side of a registered watch.
///
/// The channel closes after `unwatch`, store shutdown, or the end of the
/// backend stream. Dropping the handle closes the backend watch.
#[derive(Debug)]
pub struct WatchHandle {
    id: WatchId,
    receiver: mpsc::Receiver<DssEvent>,
}

impl WatchHandle {
    pub(crate) fn new(
        id: WatchId,
        receiver: mpsc::Receiver<DssEvent>,
    ) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> &WatchId {
        &self.id
    }

    /// Waits for the next event, `None` once the watch is closed
    pub async fn recv(&mut self) -> Option<DssEvent> {
        self.receiver.recv().await
    }

    /// Returns a buffered event without waiting
    pub fn try_recv(&mut self) -> Option<DssEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> (WatchId, ReceiverStream<DssEvent>) {
        (self.id, ReceiverStream::new(self.receiver))
    }
}
