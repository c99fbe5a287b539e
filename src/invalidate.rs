//! Invalidation fan-out: local subscribers plus peer contexts.
//!
//! The bus invokes local handlers synchronously (no ordering guarantee
//! among handlers) and, when asked, serializes the changed-table set onto
//! a named broadcast channel shared by every context attached to the same
//! logical database. Peer deliveries are re-published locally with
//! broadcasting forced off, so a notification never loops, and the
//! publishing context is skipped at the medium so it never hears its own
//! echo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::extract::TableSet;
use crate::now_millis;

/// Callback invoked with the changed-table set of each notification.
pub type InvalidationHandler = Arc<dyn Fn(&TableSet) + Send + Sync + 'static>;

/// Message serialized onto the peer broadcast channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMessage {
    pub changed_tables: Vec<String>,
    pub timestamp: i64,
}

/// Process-global registry of named broadcast channels: the in-process
/// analogue of a shared broadcast medium between execution contexts.
static CHANNELS: LazyLock<Mutex<HashMap<String, Vec<PeerEndpoint>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct PeerEndpoint {
    context_id: u64,
    tx: mpsc::UnboundedSender<PeerMessage>,
}

/// One context's attachment to a named broadcast channel.
///
/// Messages broadcast here are delivered to every *other* endpoint
/// attached under the same name; detaching happens on drop.
pub struct PeerChannel {
    name: String,
    context_id: u64,
}

impl PeerChannel {
    /// Attach to the named channel. Returns the attachment and the stream
    /// of messages broadcast by peers.
    pub fn attach(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<PeerMessage>) {
        let name = name.into();
        let context_id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        CHANNELS
            .lock()
            .expect("peer registry poisoned")
            .entry(name.clone())
            .or_default()
            .push(PeerEndpoint { context_id, tx });

        (Self { name, context_id }, rx)
    }

    /// Deliver a message to every other endpoint on this channel.
    pub fn broadcast(&self, message: &PeerMessage) {
        let mut registry = CHANNELS.lock().expect("peer registry poisoned");
        if let Some(endpoints) = registry.get_mut(&self.name) {
            endpoints.retain(|endpoint| {
                if endpoint.context_id == self.context_id {
                    return true;
                }
                // A failed send means the peer detached without cleanup.
                endpoint.tx.send(message.clone()).is_ok()
            });
        }
    }
}

impl Drop for PeerChannel {
    fn drop(&mut self) {
        let mut registry = CHANNELS.lock().expect("peer registry poisoned");
        if let Some(endpoints) = registry.get_mut(&self.name) {
            endpoints.retain(|endpoint| endpoint.context_id != self.context_id);
            if endpoints.is_empty() {
                registry.remove(&self.name);
            }
        }
    }
}

struct BusInner {
    handlers: Mutex<HashMap<u64, InvalidationHandler>>,
    next_handler_id: AtomicU64,
    peer: Option<PeerChannel>,
}

impl BusInner {
    fn publish_local(&self, tables: &TableSet) {
        let handlers: Vec<InvalidationHandler> = {
            let map = self.handlers.lock().expect("handler map poisoned");
            map.values().cloned().collect()
        };
        for handler in handlers {
            handler(tables);
        }
    }
}

/// Fan-out bus for "these tables changed" notifications.
#[derive(Clone)]
pub struct InvalidationBus {
    inner: Arc<BusInner>,
}

impl InvalidationBus {
    /// A bus with no peer channel: notifications stay in-context.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A bus attached to the named peer channel. Messages from peers are
    /// re-published locally with broadcasting forced off.
    pub fn with_peer(channel_name: impl Into<String>) -> Self {
        let (peer, mut rx) = PeerChannel::attach(channel_name);
        let bus = Self::build(Some(peer));

        let weak: Weak<BusInner> = Arc::downgrade(&bus.inner);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let tables = TableSet::from_wire(&message.changed_tables);
                tracing::debug!(tables = ?message.changed_tables, "Peer invalidation received");
                inner.publish_local(&tables);
            }
        });

        bus
    }

    fn build(peer: Option<PeerChannel>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(HashMap::new()),
                next_handler_id: AtomicU64::new(1),
                peer,
            }),
        }
    }

    /// Register a handler. Dropping the returned subscription unregisters
    /// it; handlers must not depend on invocation order.
    pub fn subscribe(&self, handler: InvalidationHandler) -> InvalidationSubscription {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .expect("handler map poisoned")
            .insert(id, handler);
        InvalidationSubscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Notify local handlers and, when requested, peer contexts.
    pub fn publish(&self, tables: &TableSet, broadcast_to_peers: bool) {
        tracing::debug!(?tables, broadcast_to_peers, "Publishing invalidation");
        self.inner.publish_local(tables);

        if broadcast_to_peers {
            if let Some(peer) = &self.inner.peer {
                peer.broadcast(&PeerMessage {
                    changed_tables: tables.to_wire(),
                    timestamp: now_millis(),
                });
            }
        }
    }

    #[cfg(test)]
    fn handler_count(&self) -> usize {
        self.inner.handlers.lock().unwrap().len()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration guard; drop to unsubscribe.
pub struct InvalidationSubscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl Drop for InvalidationSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner
                .handlers
                .lock()
                .expect("handler map poisoned")
                .remove(&self.id);
        }
    }
}
