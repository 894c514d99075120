//! Request, response and record types.
//!
//! - [`order`] - Order submission request/response and stored order rows
//! - [`menu`] - Menu items and inbound price updates
//! - [`latency`] - Per-submission latency measurements
//! - [`messages`] - Pub/Sub REST API wire types

pub mod latency;
pub mod menu;
pub mod messages;
pub mod order;

use std::collections::BTreeMap;

pub use latency::LatencySample;
pub use menu::{MenuItem, PriceUpdate, PriceUpdateNotice};
pub use order::{ErrorResponse, NewOrder, Order, OrderItem, SubmitOrderRequest, SubmitOrderResponse};

/// Identifier assigned to an order by the store
pub type OrderId = i64;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = i64;

/// Free-form store attributes attached to an order (store id, terminal, ...)
///
/// `BTreeMap` keeps the serialized form stable.
pub type StoreMetadata = BTreeMap<String, String>;
