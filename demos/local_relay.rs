//! Local relay - runs the whole relay in-process over the in-memory transport
//!
//! Usage:
//!   cargo run --example local_relay
//!
//! Connect a WebSocket client to ws://127.0.0.1:8081 while it runs to see the
//! price update notices.

use std::sync::Arc;
use std::time::Duration;

use pos_relay::broadcast::websocket;
use pos_relay::pipeline::respond;
use pos_relay::store::MemoryStore;
use pos_relay::transport::MemoryTransport;
use pos_relay::types::{OrderItem, SubmitOrderRequest};
use pos_relay::{Config, Relay};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pos_relay=debug".parse()?),
        )
        .init();

    println!("=== Local POS Relay ===\n");

    let config = Config::new("local");
    let transport = MemoryTransport::new();
    transport.create_subscription("MenuUpdates", config.update_subscription());

    let relay = Relay::new(
        config,
        Arc::new(transport.clone()),
        Arc::new(MemoryStore::with_default_menu()),
    )?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let listener = TcpListener::bind("127.0.0.1:8081").await?;
    let server = tokio::spawn(websocket::serve(
        listener,
        relay.hub().clone(),
        shutdown_tx.subscribe(),
    ));
    let tasks = relay.start(&shutdown_tx).await?;

    // A couple of orders, the first with a client start 40ms in the past
    let orders = [
        SubmitOrderRequest::new(vec![OrderItem::new("Big Mac", 2, 5.99)], 11.98)
            .with_metadata("storeId", "store-1")
            .with_request_start_time(chrono::Utc::now().timestamp_millis() - 40),
        SubmitOrderRequest::new(
            vec![
                OrderItem::new("McChicken", 1, 4.49),
                OrderItem::new("Fries", 1, 2.79),
            ],
            7.28,
        )
        .with_metadata("storeId", "store-2")
        .started_now(),
    ];
    for order in &orders {
        let result = relay.submit_order(order).await;
        let (status, reply) = respond(&result);
        println!("{} {}", status, serde_json::to_string(&reply)?);
    }

    println!("\n--- Completed orders ---");
    for order in relay.completed_orders().await? {
        println!(
            "#{} total={:.2} publish={} round_trip={}",
            order.id, order.total_price, order.latency_publish, order.latency_round_trip
        );
    }

    transport.inject(
        relay.config().update_subscription(),
        r#"{"name":"Big Mac","price":6.49}"#,
    )?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\n--- Menu ---");
    for item in relay.menu_items().await? {
        println!("{:<12} {:.2}", item.name, item.price);
    }

    println!("\n--- Metrics ---");
    println!("{}", relay.metrics_text());

    println!("Press Ctrl+C to stop (or wait 30s)...");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(Duration::from_secs(30)) => {}
    }

    let _ = shutdown_tx.send(());
    tasks.join().await;
    server.await?;
    println!("Done.");
    Ok(())
}
