//! Pub/Sub relay - runs the relay against Google Cloud Pub/Sub or the emulator
//!
//! Usage:
//!   PUBSUB_PROJECT_ID=my-project PUBSUB_CREDENTIALS=path/to/key.json cargo run --example pubsub_relay
//!
//! Optional:
//!   PUBSUB_EMULATOR_HOST=localhost:8085  # Use the local emulator (no credentials needed)
//!   RELAY_REGION_TOPIC=TopicRegionUSA    # Topic orders are published to
//!   RELAY_UPDATE_SUBSCRIPTION=store1-sub # Subscription price updates are pulled from
//!   RELAY_WS_ADDR=0.0.0.0:8081           # Live update WebSocket address

use std::sync::Arc;

use pos_relay::broadcast::websocket;
use pos_relay::store::MemoryStore;
use pos_relay::{Config, Relay};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pos_relay=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    println!("=== POS Relay ===");
    println!("Project:      {}", config.project_id());
    println!("Region topic: {}", config.region_topic());
    println!("Updates from: {}\n", config.update_subscription());

    let relay = Relay::with_pubsub(config, Arc::new(MemoryStore::with_default_menu()))?;

    let addr = std::env::var("RELAY_WS_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());
    let listener = TcpListener::bind(&addr).await?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let server = tokio::spawn(websocket::serve(
        listener,
        relay.hub().clone(),
        shutdown_tx.subscribe(),
    ));
    let tasks = relay.start(&shutdown_tx).await?;

    println!("Live updates on ws://{}", addr);
    println!("Press Ctrl+C to stop...");
    tokio::signal::ctrl_c().await?;

    let _ = shutdown_tx.send(());
    tasks.join().await;
    server.await?;

    println!("\n--- Metrics at shutdown ---");
    println!("{}", relay.metrics_text());
    Ok(())
}
