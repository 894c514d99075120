//! Inbound menu price updates.
//!
//! The listener consumes one delivery at a time and settles it before taking
//! the next:
//!
//! - a valid update is written to the store, acked and then broadcast
//! - an invalid payload or a store failure is nacked; nothing is broadcast
//!
//! Redelivery of nacked messages is left to the transport.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::Broadcaster;
use crate::error::Error;
use crate::metrics::MetricState;
use crate::store::Store;
use crate::transport::{Delivery, Subscription};
use crate::types::{PriceUpdate, PriceUpdateNotice};

/// Result of handling one delivery
#[derive(Debug)]
pub enum Outcome {
    /// Stored, acked and broadcast
    Applied(PriceUpdate),
    /// Nacked without changing anything
    Rejected(Error),
}

impl Outcome {
    /// Whether the update was applied
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}

/// Applies price updates from a subscription and fans them out
pub struct UpdateListener {
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
    metrics: Arc<MetricState>,
}

impl std::fmt::Debug for UpdateListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateListener").finish_non_exhaustive()
    }
}

impl UpdateListener {
    /// Create a listener
    pub fn new(
        store: Arc<dyn Store>,
        broadcaster: Arc<dyn Broadcaster>,
        metrics: Arc<MetricState>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            metrics,
        }
    }

    /// Validate a payload and write it to the store, without settling anything
    pub async fn apply(&self, payload: &[u8]) -> Outcome {
        let update = match PriceUpdate::parse(payload) {
            Ok(update) => update,
            Err(e) => return Outcome::Rejected(e),
        };

        match self.store.update_price(&update.name, update.price).await {
            Ok(true) => Outcome::Applied(update),
            Ok(false) => {
                tracing::warn!(item = %update.name, "price update for unknown menu item");
                Outcome::Applied(update)
            }
            Err(e) => Outcome::Rejected(e.into_persistence()),
        }
    }

    /// Handle one delivery: apply, settle and broadcast
    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let id = delivery.id().to_string();
        let outcome = self.apply(delivery.payload()).await;

        match &outcome {
            Outcome::Applied(update) => {
                if let Err(e) = delivery.ack().await {
                    tracing::warn!(message_id = %id, error = %e, "ack failed");
                }
                match serde_json::to_string(&PriceUpdateNotice::from(update)) {
                    Ok(text) => {
                        let reached = self.broadcaster.send(&text);
                        tracing::info!(
                            message_id = %id,
                            item = %update.name,
                            price = update.price,
                            subscribers = reached,
                            "menu price updated"
                        );
                    }
                    Err(e) => tracing::error!(error = %e, "cannot encode price notice"),
                }
            }
            Outcome::Rejected(e) => {
                tracing::warn!(message_id = %id, error = %e, "price update rejected");
                if let Err(e) = delivery.nack().await {
                    tracing::warn!(message_id = %id, error = %e, "nack failed");
                }
            }
        }

        self.metrics.record_update(outcome.is_applied());
        outcome
    }

    /// Consume `subscription` until it ends or shutdown is signalled
    pub async fn run(&self, mut subscription: Subscription, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(subscription = subscription.name(), "update listener started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                next = subscription.next() => match next {
                    Some(Ok(delivery)) => {
                        self.handle(delivery).await;
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "subscription error");
                    }
                    None => {
                        tracing::info!(subscription = subscription.name(), "subscription ended");
                        break;
                    }
                },
            }
        }

        tracing::info!("update listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::LiveHub;
    use crate::config::DEFAULT_LATENCY_BUCKETS;
    use crate::metrics::names;
    use crate::store::MemoryStore;
    use crate::transport::{MemoryTransport, Transport};

    struct Fixture {
        transport: MemoryTransport,
        store: Arc<MemoryStore>,
        hub: Arc<LiveHub>,
        metrics: Arc<MetricState>,
        listener: UpdateListener,
    }

    fn fixture() -> Fixture {
        let transport = MemoryTransport::new();
        transport.create_subscription("menu-updates", "store1-sub");
        let store = Arc::new(MemoryStore::with_default_menu());
        let hub = Arc::new(LiveHub::new());
        let metrics = Arc::new(MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap());
        let listener = UpdateListener::new(store.clone(), hub.clone(), metrics.clone());
        Fixture {
            transport,
            store,
            hub,
            metrics,
            listener,
        }
    }

    async fn price_of(store: &MemoryStore, name: &str) -> f64 {
        store
            .list_menu_items()
            .await
            .unwrap()
            .into_iter()
            .find(|item| item.name == name)
            .unwrap()
            .price
    }

    #[tokio::test]
    async fn test_valid_update_is_stored_acked_and_broadcast() {
        let f = fixture();
        let (_id, mut rx) = f.hub.register();
        let mut sub = f.transport.subscribe("store1-sub").await.unwrap();
        let id = f
            .transport
            .inject("store1-sub", br#"{"name":"Big Mac","price":6.49}"#.to_vec())
            .unwrap();

        let outcome = f.listener.handle(sub.next().await.unwrap().unwrap()).await;
        assert!(outcome.is_applied());
        assert_eq!(price_of(&f.store, "Big Mac").await, 6.49);
        assert_eq!(f.transport.acked(), vec![id]);
        assert_eq!(
            rx.try_recv().unwrap(),
            r#"{"message":"Updated price for Big Mac to 6.49"}"#
        );
        assert_eq!(f.metrics.sink().counter(names::MENU_UPDATES_APPLIED), Some(1));
    }

    #[tokio::test]
    async fn test_missing_price_is_nacked() {
        let f = fixture();
        let (_id, mut rx) = f.hub.register();
        let mut sub = f.transport.subscribe("store1-sub").await.unwrap();
        let id = f
            .transport
            .inject("store1-sub", br#"{"name":"Big Mac"}"#.to_vec())
            .unwrap();

        let outcome = f.listener.handle(sub.next().await.unwrap().unwrap()).await;
        assert!(matches!(outcome, Outcome::Rejected(Error::Validation(_))));
        assert_eq!(price_of(&f.store, "Big Mac").await, 5.99);
        assert_eq!(f.transport.nacked(), vec![id]);
        assert!(f.transport.acked().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(f.metrics.sink().counter(names::MENU_UPDATES_REJECTED), Some(1));
    }

    #[tokio::test]
    async fn test_store_failure_is_nacked_without_broadcast() {
        let f = fixture();
        let (_id, mut rx) = f.hub.register();
        f.store.set_available(false);
        let mut sub = f.transport.subscribe("store1-sub").await.unwrap();
        f.transport
            .inject("store1-sub", br#"{"name":"Big Mac","price":6.49}"#.to_vec())
            .unwrap();

        let outcome = f.listener.handle(sub.next().await.unwrap().unwrap()).await;
        assert!(matches!(outcome, Outcome::Rejected(Error::Persistence(_))));
        assert_eq!(f.transport.nacked().len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_item_is_acked() {
        let f = fixture();
        let mut sub = f.transport.subscribe("store1-sub").await.unwrap();
        f.transport
            .inject("store1-sub", br#"{"name":"Whopper","price":6.49}"#.to_vec())
            .unwrap();

        let outcome = f.listener.handle(sub.next().await.unwrap().unwrap()).await;
        assert!(outcome.is_applied());
        assert_eq!(f.transport.acked().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        let sub = f.transport.subscribe("store1-sub").await.unwrap();
        let (tx, rx) = broadcast::channel(1);
        let listener = Arc::new(f.listener);

        let task = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.run(sub, rx).await })
        };
        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
