//! In-process [`Transport`] with Pub/Sub-like semantics.
//!
//! Topics fan out to every subscription bound to them. Each subscription
//! buffers messages until its single consumer picks them up; a nack puts the
//! message back at the end of the queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use super::{Acknowledger, Delivery, Subscription, Transport};
use crate::error::Error;
use crate::Result;

type DeliveryTx = mpsc::UnboundedSender<Result<Delivery>>;
type DeliveryRx = mpsc::UnboundedReceiver<Result<Delivery>>;

#[derive(Debug)]
struct Queue {
    tx: DeliveryTx,
    /// Taken by the first (and only) consumer
    rx: Option<DeliveryRx>,
}

#[derive(Debug, Default)]
struct Inner {
    /// topic -> bound subscriptions
    topics: RwLock<FxHashMap<String, Vec<String>>>,
    queues: RwLock<FxHashMap<String, Queue>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    acked: Mutex<Vec<String>>,
    nacked: Mutex<Vec<String>>,
    next_id: AtomicU64,
    fail_publish: AtomicBool,
    publish_delay: Mutex<Duration>,
}

impl Inner {
    fn next_message_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn enqueue(self: &Arc<Self>, subscription: &str, id: String, payload: Vec<u8>) -> Result<()> {
        let queues = self.queues.read();
        let queue = queues
            .get(subscription)
            .ok_or_else(|| Error::Transport(format!("subscription not found: {}", subscription)))?;

        let acker = MemoryAcker {
            inner: Arc::downgrade(self),
            subscription: subscription.to_string(),
            id: id.clone(),
            payload: payload.clone(),
        };
        // The receiver may be gone; Pub/Sub keeps messages for absent consumers
        // too, but there is nobody left to hand them to here.
        let _ = queue.tx.send(Ok(Delivery::new(id, payload, acker)));
        Ok(())
    }
}

struct MemoryAcker {
    inner: Weak<Inner>,
    subscription: String,
    id: String,
    payload: Vec<u8>,
}

impl MemoryAcker {
    fn inner(&self) -> Result<Arc<Inner>> {
        self.inner.upgrade().ok_or(Error::ConnectionClosed)
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.inner()?.acked.lock().push(self.id.clone());
        Ok(())
    }

    async fn nack(&self) -> Result<()> {
        let inner = self.inner()?;
        inner.nacked.lock().push(self.id.clone());
        inner.enqueue(&self.subscription, self.id.clone(), self.payload.clone())
    }
}

/// In-memory transport.
///
/// Cheap to clone; clones share topics, subscriptions and recorded traffic.
///
/// # Example
///
/// ```rust
/// use pos_relay::transport::{MemoryTransport, Transport};
///
/// # async fn example() -> pos_relay::Result<()> {
/// let transport = MemoryTransport::new();
/// transport.create_subscription("prices", "store1-sub");
///
/// let mut subscription = transport.subscribe("store1-sub").await?;
/// transport.publish("prices", b"hello".to_vec()).await?;
///
/// let delivery = subscription.next().await.unwrap()?;
/// assert_eq!(delivery.payload(), b"hello");
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Create a transport with no topics or subscriptions
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every publish by `delay`
    #[must_use]
    pub fn with_publish_delay(self, delay: Duration) -> Self {
        *self.inner.publish_delay.lock() = delay;
        self
    }

    /// Create `subscription` and bind it to `topic`; existing names are kept
    pub fn create_subscription(&self, topic: &str, subscription: &str) {
        let mut queues = self.inner.queues.write();
        if queues.contains_key(subscription) {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(subscription.to_string(), Queue { tx, rx: Some(rx) });
        self.inner
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(subscription.to_string());
    }

    /// Make publishes fail until called again with `false`
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Deliver a payload straight to a subscription, bypassing topics
    pub fn inject(&self, subscription: &str, payload: impl Into<Vec<u8>>) -> Result<String> {
        let id = self.inner.next_message_id();
        self.inner.enqueue(subscription, id.clone(), payload.into())?;
        Ok(id)
    }

    /// Payloads published to `topic`, oldest first
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Ids of acked messages in ack order
    pub fn acked(&self) -> Vec<String> {
        self.inner.acked.lock().clone()
    }

    /// Ids of nacked messages in nack order
    pub fn nacked(&self) -> Vec<String> {
        self.inner.nacked.lock().clone()
    }

    /// Close a subscription's stream; buffered messages are still delivered
    pub fn close_subscription(&self, subscription: &str) {
        self.inner.queues.write().remove(subscription);
        for bound in self.inner.topics.write().values_mut() {
            bound.retain(|s| s != subscription);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String> {
        let delay = *self.inner.publish_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("publish to {} failed", topic)));
        }

        let id = self.inner.next_message_id();
        self.inner
            .published
            .lock()
            .push((topic.to_string(), payload.clone()));

        let bound = self.inner.topics.read().get(topic).cloned().unwrap_or_default();
        for subscription in bound {
            self.inner.enqueue(&subscription, id.clone(), payload.clone())?;
        }

        tracing::debug!(topic, message_id = %id, "published");
        Ok(id)
    }

    async fn subscribe(&self, subscription: &str) -> Result<Subscription> {
        let rx = {
            let mut queues = self.inner.queues.write();
            let queue = queues.get_mut(subscription).ok_or_else(|| {
                Error::Transport(format!("subscription not found: {}", subscription))
            })?;
            queue.rx.take().ok_or_else(|| {
                Error::Transport(format!("subscription {} already has a consumer", subscription))
            })?
        };

        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Subscription::from_stream(subscription, deliveries))
    }
}
