//! Bidi Connection - The Core Communication Layer
//!
//! Design decisions:
//! 1. Single socket per session; one writer task, one reader task
//! 2. Async message passing - no locks on send/receive path
//! 3. Request/response matching via id, events broadcast to subscribers
//! 4. Fail fast - no retries, no queuing. Let the caller decide.
//!
//! Responses are matched strictly by id, never by send order: the remote may
//! interleave results and events freely. Frames are pumped by a single reader
//! task, so handlers for one event run to completion (in registration order)
//! before the next frame is processed.

use dashmap::DashMap;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{CommandEnvelope, CommandId, EventFrame, IncomingFrame};
use crate::error::{BidiError, Result};

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(&EventFrame) + Send + Sync>;

/// Handle returned by `on`, consumed by `off`
pub type SubscriptionId = u64;

/// Message handed to the socket writer task
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long `send` waits for a matching response frame
    pub command_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection - owns the correlation state for one session socket
pub struct Connection {
    /// Monotonic command id counter
    next_id: AtomicU64,

    /// Monotonic subscription id counter
    next_subscription: AtomicU64,

    /// Pending commands waiting for responses
    /// Key: command id, Value: oneshot sender for the correlated result
    pending: DashMap<CommandId, oneshot::Sender<Result<Value>>>,

    /// Event subscribers
    /// Key: method name (e.g., "browsingContext.contextCreated")
    subscribers: DashMap<String, Vec<(SubscriptionId, EventCallback)>>,

    /// Outgoing frames, consumed by the writer task
    outgoing: mpsc::UnboundedSender<Outbound>,

    /// Set once the socket closes or errors; sends fail fast afterwards
    closed: AtomicBool,

    config: ConnectionConfig,
}

impl Connection {
    pub fn new(outgoing: mpsc::UnboundedSender<Outbound>, config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            pending: DashMap::new(),
            subscribers: DashMap::new(),
            outgoing,
            closed: AtomicBool::new(false),
            config,
        })
    }

    /// Send a command and wait for the correlated response.
    ///
    /// Rejects with `CommandTimeout` when no response arrives in time (the
    /// pending entry is removed; no retry - commands are not idempotent) and
    /// with `ConnectionClosed` once the socket is gone.
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        let method = method.into();
        if self.is_closed() {
            return Err(BidiError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let envelope = CommandEnvelope {
            id,
            method: method.clone(),
            params,
        };
        let json = serde_json::to_string(&envelope)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        tracing::trace!("[Connection] -> {} (id {})", method, id);
        if self.outgoing.send(Outbound::Text(json)).is_err() {
            self.pending.remove(&id);
            return Err(BidiError::ConnectionClosed);
        }

        match tokio::time::timeout(self.config.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a response: the connection died
            Ok(Err(_)) => Err(BidiError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(BidiError::CommandTimeout {
                    method,
                    timeout: self.config.command_timeout,
                })
            }
        }
    }

    /// Subscribe to unsolicited frames by method name. Handlers run in
    /// registration order; multiple handlers per method are allowed.
    pub fn on(&self, method: impl Into<String>, callback: EventCallback) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .entry(method.into())
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a previously registered handler. Safe to call while frames are
    /// being dispatched; in-flight dispatch works on a snapshot.
    pub fn off(&self, method: &str, subscription: SubscriptionId) {
        if let Some(mut entry) = self.subscribers.get_mut(method) {
            entry.retain(|(id, _)| *id != subscription);
        }
    }

    /// Handle one incoming frame from the socket reader
    pub fn handle_frame(&self, text: &str) {
        let frame: IncomingFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("[Connection] Undecodable frame: {}", e);
                return;
            }
        };

        match frame {
            IncomingFrame::Success(success) => {
                self.resolve(success.id, Ok(success.result));
            }
            IncomingFrame::Error(error) => {
                self.resolve(
                    error.id,
                    Err(BidiError::Remote {
                        error: error.error,
                        message: error.message,
                    }),
                );
            }
            IncomingFrame::Event(event) => self.dispatch(&event),
        }
    }

    fn resolve(&self, id: CommandId, result: Result<Value>) {
        if let Some((_, tx)) = self.pending.remove(&id) {
            let _ = tx.send(result); // Ignore send errors (caller timed out)
        } else {
            tracing::warn!("[Connection] Response for unknown command id {}", id);
        }
    }

    fn dispatch(&self, event: &EventFrame) {
        // Snapshot the handler list so on/off during dispatch cannot race the
        // iteration
        let handlers: Vec<EventCallback> = match self.subscribers.get(&event.method) {
            Some(entry) => entry.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        };

        for handler in handlers {
            // A panicking handler must not starve the rest
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    "[Connection] Event handler panicked for {}",
                    event.method
                );
            }
        }
    }

    /// Socket closed or fatally errored: reject every pending command and
    /// make future sends fail fast
    pub fn handle_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending: Vec<CommandId> = self.pending.iter().map(|entry| *entry.key()).collect();
        if !pending.is_empty() {
            tracing::info!(
                "[Connection] Closed with {} commands in flight",
                pending.len()
            );
        }
        for id in pending {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(BidiError::ConnectionClosed));
            }
        }
    }

    /// Close the connection: stop the writer, reject all pending commands
    pub fn close(&self) {
        let _ = self.outgoing.send(Outbound::Close);
        self.handle_close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
