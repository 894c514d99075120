//! # pos-relay
//!
//! A latency-instrumented point-of-sale order relay over Google Cloud Pub/Sub.
//!
//! ## Features
//!
//! - **Order submission** - Publish orders to a regional topic, persist them and
//!   measure publish, UI-to-API and round-trip latency
//! - **Menu price updates** - Consume a subscription, apply price changes and
//!   fan them out to live WebSocket clients
//! - **Latency metrics** - Histograms, gauges and counters in the Prometheus
//!   text format, with gauges that decay to zero when the relay goes idle
//! - **Async/Await** - Built on Tokio; every collaborator is a trait object
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use pos_relay::{Config, Relay};
//! use pos_relay::store::MemoryStore;
//! use pos_relay::transport::MemoryTransport;
//! use pos_relay::types::{OrderItem, SubmitOrderRequest};
//!
//! # async fn example() -> pos_relay::Result<()> {
//! let transport = MemoryTransport::new();
//! let relay = Relay::new(
//!     Config::new("local"),
//!     Arc::new(transport),
//!     Arc::new(MemoryStore::with_default_menu()),
//! )?;
//!
//! let order = SubmitOrderRequest::new(vec![OrderItem::new("Big Mac", 1, 5.99)], 5.99)
//!     .with_metadata("storeId", "store-1")
//!     .started_now();
//! let receipt = relay.submit_order(&order).await?;
//! println!("order {} took {}", receipt.order_id, receipt.latency.round_trip_label());
//!
//! println!("{}", relay.metrics_text());
//! # Ok(())
//! # }
//! ```
//!
//! ## Latencies
//!
//! Every submission measures three values, all reported as `"<n> ms"`:
//!
//! - publish: time spent publishing to the region topic
//! - UI-to-API: client `requestStartTime` to the relay picking the order up;
//!   negative when the client clock runs ahead
//! - round trip: client start to the response, never below publish
//!
//! ## Architecture
//!
//! This crate is organized into several modules:
//!
//! - [`pipeline`] - Submission pipeline, update listener and idle decay
//! - [`metrics`] - Metric sink and the relay's metric state
//! - [`transport`] - Publish/subscribe abstraction and in-memory transport
//! - [`client`] - Google Cloud Pub/Sub REST client
//! - [`store`] - Order and menu persistence
//! - [`broadcast`] - Live subscriber hub and WebSocket server
//! - [`types`] - Request/response and wire types
//! - [`config`] - Configuration
//! - [`error`] - Error types for the crate

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod transport;
pub mod types;

use std::sync::Arc;

use tokio::task::JoinHandle;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use error::Error;

use crate::broadcast::LiveHub;
use crate::client::PubSubClient;
use crate::metrics::MetricState;
use crate::pipeline::{IdleDecay, OrderReceipt, SubmissionPipeline, UpdateListener};
use crate::store::Store;
use crate::transport::Transport;
use crate::types::{MenuItem, Order, SubmitOrderRequest};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The relay
///
/// Owns the metric state and wires it, the transport, the store and the live
/// hub into the submission pipeline, the update listener and the idle decay
/// loop.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use pos_relay::{Config, Relay};
/// use pos_relay::store::MemoryStore;
///
/// # async fn example() -> pos_relay::Result<()> {
/// let config = Config::from_env()?;
/// let relay = Relay::with_pubsub(config, Arc::new(MemoryStore::with_default_menu()))?;
///
/// let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
/// let tasks = relay.start(&shutdown_tx).await?;
///
/// // ... serve submissions ...
///
/// let _ = shutdown_tx.send(());
/// tasks.join().await;
/// # Ok(())
/// # }
/// ```
pub struct Relay {
    config: Config,
    metrics: Arc<MetricState>,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    hub: Arc<LiveHub>,
    pipeline: SubmissionPipeline,
    listener: Arc<UpdateListener>,
    decay: IdleDecay,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("subscribers", &self.hub.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a relay over the given transport and store
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the latency buckets are not strictly
    /// increasing or the decay period is zero.
    pub fn new(config: Config, transport: Arc<dyn Transport>, store: Arc<dyn Store>) -> Result<Self> {
        if config.decay_period().is_zero() {
            return Err(Error::Config("decay period must be positive".into()));
        }

        let metrics = Arc::new(MetricState::new(config.latency_buckets())?);
        let hub = Arc::new(LiveHub::new());
        let pipeline = SubmissionPipeline::new(
            transport.clone(),
            store.clone(),
            metrics.clone(),
            config.region_topic(),
        );
        let listener = Arc::new(UpdateListener::new(
            store.clone(),
            hub.clone(),
            metrics.clone(),
        ));
        let decay = IdleDecay::new(metrics.clone(), config.decay_period(), config.idle_threshold());

        Ok(Self {
            config,
            metrics,
            store,
            transport,
            hub,
            pipeline,
            listener,
            decay,
        })
    }

    /// Create a relay publishing and pulling through Google Cloud Pub/Sub
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the Pub/Sub client
    /// cannot be created.
    pub fn with_pubsub(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        let client = PubSubClient::new(&config)?;
        Self::new(config, Arc::new(client), store)
    }

    /// Submit an order; see [`SubmissionPipeline::submit`]
    pub async fn submit_order(&self, request: &SubmitOrderRequest) -> Result<OrderReceipt> {
        self.pipeline.submit(request).await
    }

    /// Stored orders, most recent first
    pub async fn completed_orders(&self) -> Result<Vec<Order>> {
        self.store.list_orders().await.map_err(Error::into_persistence)
    }

    /// Menu items ordered by id
    pub async fn menu_items(&self) -> Result<Vec<MenuItem>> {
        self.store.list_menu_items().await.map_err(Error::into_persistence)
    }

    /// Current metrics in the Prometheus text format
    /// (content type [`metrics::CONTENT_TYPE`])
    pub fn metrics_text(&self) -> String {
        self.metrics.render()
    }

    /// The shared metric state
    pub fn metrics(&self) -> &Arc<MetricState> {
        &self.metrics
    }

    /// The live subscriber hub price updates are broadcast to
    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// The update listener, for driving deliveries by hand
    pub fn listener(&self) -> &Arc<UpdateListener> {
        &self.listener
    }

    /// The configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to the update subscription and spawn the listener and the
    /// idle decay loop; both stop when `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport refuses the subscription.
    pub async fn start(&self, shutdown: &tokio::sync::broadcast::Sender<()>) -> Result<BackgroundTasks> {
        let subscription = self
            .transport
            .subscribe(self.config.update_subscription())
            .await?;

        let listener = {
            let listener = self.listener.clone();
            let shutdown = shutdown.subscribe();
            tokio::spawn(async move { listener.run(subscription, shutdown).await })
        };
        let decay = {
            let decay = self.decay.clone();
            let shutdown = shutdown.subscribe();
            tokio::spawn(async move { decay.run(shutdown).await })
        };

        tracing::info!(
            region_topic = self.config.region_topic(),
            update_subscription = self.config.update_subscription(),
            "relay started"
        );
        Ok(BackgroundTasks { listener, decay })
    }
}

/// Handles of the tasks spawned by [`Relay::start`]
#[derive(Debug)]
pub struct BackgroundTasks {
    listener: JoinHandle<()>,
    decay: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Wait for both tasks to finish
    pub async fn join(self) {
        if let Err(e) = self.listener.await {
            tracing::error!(error = %e, "update listener task failed");
        }
        if let Err(e) = self.decay.await {
            tracing::error!(error = %e, "idle decay task failed");
        }
    }

    /// Stop both tasks without waiting for shutdown
    pub fn abort(&self) {
        self.listener.abort();
        self.decay.abort();
    }
}
