//! Publish/subscribe transport.
//!
//! [`Transport`] is what the relay needs from a message bus: publish a payload
//! to a topic and consume a subscription as a stream of [`Delivery`] values,
//! each of which must be acked or nacked exactly once.
//!
//! Two implementations ship with the crate:
//!
//! - [`PubSubClient`](crate::client::PubSubClient) talks to Google Cloud
//!   Pub/Sub (or its emulator) over REST
//! - [`MemoryTransport`] keeps everything in process, for tests and demos

mod memory;

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use memory::MemoryTransport;

use crate::Result;

/// A message bus the relay publishes to and consumes from
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` to `topic`, returning the message id
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String>;

    /// Start consuming `subscription`
    async fn subscribe(&self, subscription: &str) -> Result<Subscription>;
}

/// Settles one delivery with the transport
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirm processing; the message will not be delivered again
    async fn ack(&self) -> Result<()>;

    /// Reject processing; the transport should redeliver
    async fn nack(&self) -> Result<()>;
}

/// One received message and its ack/nack handle.
///
/// Settling consumes the delivery, so a message cannot be acked twice.
pub struct Delivery {
    id: String,
    payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery
    pub fn new(id: impl Into<String>, payload: Vec<u8>, acker: impl Acknowledger + 'static) -> Self {
        Self {
            id: id.into(),
            payload,
            acker: Box::new(acker),
        }
    }

    /// Transport message id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the message
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Negatively acknowledge the message so it is redelivered
    pub async fn nack(self) -> Result<()> {
        self.acker.nack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// A stream of deliveries from one subscription.
///
/// Ends when the transport stops delivering. A background task feeding the
/// stream, if any, is aborted when the subscription is dropped.
pub struct Subscription {
    name: String,
    deliveries: BoxStream<'static, Result<Delivery>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap an arbitrary stream of deliveries
    pub fn from_stream(
        name: impl Into<String>,
        deliveries: impl Stream<Item = Result<Delivery>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            deliveries: deliveries.boxed(),
            task: None,
        }
    }

    /// Wrap the receiving end of a channel fed by a producer task
    pub fn from_receiver(name: impl Into<String>, rx: mpsc::Receiver<Result<Delivery>>) -> Self {
        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Self::from_stream(name, deliveries)
    }

    /// Tie a producer task's lifetime to this subscription
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Subscription name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next delivery, or `None` once the subscription has ended
    pub async fn next(&mut self) -> Option<Result<Delivery>> {
        self.deliveries.next().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
