//! Live fan-out of menu changes.
//!
//! [`LiveHub`] keeps a registry of subscriber channels. Sending takes a
//! snapshot of the registry and uses `try_send` on each channel, so a full or
//! closed subscriber never holds up the others. Closed subscribers are pruned
//! after the send.
//!
//! The [`websocket`] module connects WebSocket clients to a hub.

pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Per-subscriber queue length
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Identifier of a registered subscriber
pub type SubscriberId = u64;

/// Fan-out channel to live subscribers
pub trait Broadcaster: Send + Sync {
    /// Send `message` to every open subscriber, returning how many accepted it
    fn send(&self, message: &str) -> usize;
}

/// Registry of live subscribers.
///
/// # Example
///
/// ```rust
/// use pos_relay::broadcast::{Broadcaster, LiveHub};
///
/// let hub = LiveHub::new();
/// let (_id, mut rx) = hub.register();
///
/// assert_eq!(hub.send("hello"), 1);
/// assert_eq!(rx.try_recv().unwrap(), "hello");
/// ```
#[derive(Debug)]
pub struct LiveHub {
    subscribers: RwLock<FxHashMap<SubscriberId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveHub {
    /// Create a hub with the default per-subscriber buffer
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a hub whose subscribers queue at most `buffer` messages
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Add a subscriber
    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.write().insert(id, tx);
        tracing::debug!(subscriber = id, "subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, "subscriber unregistered");
        }
        removed
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether no subscriber is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Broadcaster for LiveHub {
    fn send(&self, message: &str) -> usize {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<String>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = id, "subscriber lagging, message dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
            }
        }

        delivered
    }
}
