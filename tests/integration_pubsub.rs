//! Integration tests against the Pub/Sub emulator.
//!
//! # Setup
//!
//! 1. Start the emulator: `gcloud beta emulators pubsub start --project=relay-test`
//! 2. Set environment variables:
//!    - PUBSUB_EMULATOR_HOST: Emulator address, e.g. `localhost:8085`
//!    - PUBSUB_PROJECT_ID: Project id the emulator was started with
//!
//! # Running
//!
//! ```bash
//! PUBSUB_EMULATOR_HOST=localhost:8085 PUBSUB_PROJECT_ID=relay-test cargo test --test integration_pubsub
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pos_relay::client::PubSubClient;
use pos_relay::config::Environment;
use pos_relay::store::MemoryStore;
use pos_relay::transport::Transport;
use pos_relay::types::{OrderItem, SubmitOrderRequest};
use pos_relay::{Config, Error, Relay};

/// Helper to build an emulator config from environment variables
fn emulator_config() -> Option<Config> {
    let host = std::env::var("PUBSUB_EMULATOR_HOST").ok()?;
    let project = std::env::var("PUBSUB_PROJECT_ID").ok()?;
    Some(Config::new(project).with_environment(Environment::Emulator { host }))
}

/// Skip test if the emulator is not configured
macro_rules! require_config {
    () => {
        match emulator_config() {
            Some(c) => c,
            None => {
                eprintln!("Skipping test: PUBSUB_EMULATOR_HOST and PUBSUB_PROJECT_ID not set");
                return;
            }
        }
    };
}

/// Unique resource names so reruns do not see old messages
fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test]
async fn test_publish_and_pull() {
    let config = require_config!();
    let client = PubSubClient::new(&config).unwrap();
    let topic = unique("orders");
    let subscription = unique("orders-sub");

    client.create_topic(&topic).await.unwrap();
    client.create_topic(&topic).await.unwrap();
    client.create_subscription(&topic, &subscription, 10).await.unwrap();

    let id = client.publish(&topic, br#"{"items":[]}"#).await.unwrap();
    assert!(!id.is_empty());

    let mut stream = Transport::subscribe(&client, &subscription).await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("no delivery within 10s")
        .unwrap()
        .unwrap();
    assert_eq!(delivery.id(), id);
    assert_eq!(delivery.payload(), br#"{"items":[]}"#);
    delivery.ack().await.unwrap();
}

#[tokio::test]
async fn test_nack_redelivers() {
    let config = require_config!();
    let client = PubSubClient::new(&config).unwrap();
    let topic = unique("menu");
    let subscription = unique("menu-sub");
    client.create_topic(&topic).await.unwrap();
    client.create_subscription(&topic, &subscription, 10).await.unwrap();

    let id = client.publish(&topic, b"{}").await.unwrap();
    let mut stream = Transport::subscribe(&client, &subscription).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    first.nack().await.unwrap();

    let again = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(again.id(), id);
    again.ack().await.unwrap();
}

#[tokio::test]
async fn test_publish_to_missing_topic_fails() {
    let config = require_config!();
    let client = PubSubClient::new(&config).unwrap();

    let err = Transport::publish(&client, &unique("missing"), b"{}".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_relay_round_trip_over_emulator() {
    let config = require_config!();
    let client = PubSubClient::new(&config).unwrap();
    let region_topic = unique("region");
    let update_topic = unique("updates");
    let update_subscription = unique("store1-sub");
    client.create_topic(&region_topic).await.unwrap();
    client.create_topic(&update_topic).await.unwrap();
    client
        .create_subscription(&update_topic, &update_subscription, 10)
        .await
        .unwrap();

    let config = config
        .with_region_topic(&region_topic)
        .with_update_subscription(&update_subscription);
    let relay = Relay::with_pubsub(config, Arc::new(MemoryStore::with_default_menu())).unwrap();
    let (tx, _) = tokio::sync::broadcast::channel(1);
    let tasks = relay.start(&tx).await.unwrap();
    let (_id, mut updates) = relay.hub().register();

    let order = SubmitOrderRequest::new(vec![OrderItem::new("Big Mac", 1, 5.99)], 5.99)
        .with_request_start_time(Utc::now().timestamp_millis() - 50);
    let receipt = relay.submit_order(&order).await.unwrap();
    assert!(receipt.latency.round_trip >= receipt.latency.publish);

    client
        .publish(&update_topic, br#"{"name":"Big Mac","price":6.49}"#)
        .await
        .unwrap();
    let notice = tokio::time::timeout(Duration::from_secs(10), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice, r#"{"message":"Updated price for Big Mac to 6.49"}"#);

    tx.send(()).unwrap();
    tasks.join().await;
}
