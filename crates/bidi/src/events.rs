//! Session event bus
//!
//! Managers translate raw protocol frames into typed `SessionEvent`s and
//! publish them here; user code observes the session through broadcast
//! receivers. A receiver that falls more than the buffer behind lags and
//! skips ahead instead of blocking the publisher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default per-receiver buffer; overridable through `SessionConfig`
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Session-level events observable by user code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Started,
    Ended,
    ContextCreated { context: String, url: String },
    ContextDestroyed { context: String },
    CurrentContextChanged { context: String },
    AllWindowsRemoved,
    PromptOpened { context: String, message: String },
    PromptHandled { context: String, accepted: bool },
    NavigationStarted { context: String, url: String },
}

pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver an event to every current receiver. With no receivers the
    /// event is dropped; publishing never blocks or fails.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
