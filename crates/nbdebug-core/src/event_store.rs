//! Broadcast + history store for debug events sent to the host.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Default history size limit (1 MB of serialized events).
const HISTORY_BYTES: usize = 1024 * 1024;

/// An engine event on its way to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugEvent {
    /// Header of the host request that was in flight when the event arrived.
    pub parent_header: Value,
    /// The DAP event as sent by the engine.
    pub content: Value,
}

impl DebugEvent {
    /// Event name, `""` when absent.
    #[must_use]
    pub fn event(&self) -> &str {
        self.content
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn approx_bytes(&self) -> usize {
        // Close enough for history accounting without serializing twice.
        self.content.to_string().len() + self.parent_header.to_string().len()
    }
}

#[derive(Clone)]
struct StoredEvent {
    event: DebugEvent,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
}

/// Event store with broadcast and history support.
///
/// A host that subscribes late (for instance after reopening the notebook)
/// receives the recent history, then live events.
pub struct EventStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<DebugEvent>,
    history_bytes: usize,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create a new event store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(HISTORY_BYTES)
    }

    /// Create an event store keeping at most `history_bytes` of history.
    #[must_use]
    pub fn with_history_limit(history_bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
            history_bytes,
        }
    }

    /// Push an event to both live listeners and history.
    pub fn push(&self, event: DebugEvent) {
        let _ = self.sender.send(event.clone()); // live listeners
        let bytes = event.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > self.history_bytes {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent { event, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<DebugEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Drop the history. Live subscribers are unaffected.
    pub fn clear_history(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.history.clear();
        inner.total_bytes = 0;
    }

    /// Stream that yields history first, then live events.
    ///
    /// Lagging subscribers silently skip the events they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, DebugEvent> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
