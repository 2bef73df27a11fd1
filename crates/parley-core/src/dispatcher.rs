use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use parley_types::ChatEvent;

/// Receives domain events once the change behind them has committed.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ChatEvent);
}

/// Sink that drops everything. Used when no broadcaster is wired up.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: ChatEvent) {}
}

/// In-process fan-out of chat events to any number of subscribers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscriber receives every event; filter on `conversation_id()`.
    broadcast_tx: broadcast::Sender<ChatEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Subscribers lagging more than `capacity` events behind lose the oldest.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

impl EventSink for Dispatcher {
    fn publish(&self, event: ChatEvent) {
        trace!("Dispatching {} for conversation {}", event.name(), event.conversation_id());
        // No receivers is not an error
        let _ = self.inner.broadcast_tx.send(event);
    }
}
