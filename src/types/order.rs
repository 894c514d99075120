//! Order submission types.
//!
//! Clients send a [`SubmitOrderRequest`]; the relay publishes an
//! [`OrderEvent`] to the region topic, appends a [`NewOrder`] row to the store
//! and answers with a [`SubmitOrderResponse`]. Stored rows come back as
//! [`Order`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::latency::LatencySample;
use super::{OrderId, StoreMetadata, TimestampMs};
use crate::error::Error;

/// One line of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Menu item name
    pub name: String,
    /// Quantity ordered
    pub qty: u32,
    /// Unit price
    pub price: f64,
}

impl OrderItem {
    /// Create an order line
    pub fn new(name: impl Into<String>, qty: u32, price: f64) -> Self {
        Self {
            name: name.into(),
            qty,
            price,
        }
    }
}

/// Body of an order submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrderRequest {
    /// Ordered lines
    pub items: Vec<OrderItem>,

    /// Total charged for the order
    pub total_price: f64,

    /// Store attributes forwarded with the order
    #[serde(default)]
    pub store_metadata: StoreMetadata,

    /// Client wall-clock time the request started (epoch ms)
    #[serde(default)]
    pub request_start_time: Option<TimestampMs>,
}

impl SubmitOrderRequest {
    /// Create a request without metadata or start time
    pub fn new(items: Vec<OrderItem>, total_price: f64) -> Self {
        Self {
            items,
            total_price,
            store_metadata: StoreMetadata::new(),
            request_start_time: None,
        }
    }

    /// Attach a store attribute
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.store_metadata.insert(key.into(), value.into());
        self
    }

    /// Set the client start time (epoch ms)
    #[must_use]
    pub fn with_request_start_time(mut self, start_ms: TimestampMs) -> Self {
        self.request_start_time = Some(start_ms);
        self
    }

    /// Stamp the request as starting now
    #[must_use]
    pub fn started_now(self) -> Self {
        self.with_request_start_time(Utc::now().timestamp_millis())
    }
}

/// Payload published to the region topic
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent<'a> {
    /// Ordered lines
    pub items: &'a [OrderItem],
    /// Total charged
    pub total_price: f64,
    /// Store attributes
    pub store_metadata: &'a StoreMetadata,
}

impl<'a> From<&'a SubmitOrderRequest> for OrderEvent<'a> {
    fn from(request: &'a SubmitOrderRequest) -> Self {
        Self {
            items: &request.items,
            total_price: request.total_price,
            store_metadata: &request.store_metadata,
        }
    }
}

/// Row handed to the store; items and metadata are already serialized
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    /// Serialized order lines (JSON array)
    pub items: String,
    /// Total charged
    pub total_price: f64,
    /// Serialized store attributes (JSON object)
    pub store_metadata: String,
    /// Publish latency label, e.g. `"12 ms"`
    pub latency_publish: String,
    /// Round-trip latency label
    pub latency_round_trip: String,
}

impl NewOrder {
    /// Build the row for a submission and its measured latencies
    pub fn from_submission(
        request: &SubmitOrderRequest,
        latency: &LatencySample,
    ) -> Result<Self, Error> {
        Ok(Self {
            items: serde_json::to_string(&request.items)?,
            total_price: request.total_price,
            store_metadata: serde_json::to_string(&request.store_metadata)?,
            latency_publish: latency.publish_label(),
            latency_round_trip: latency.round_trip_label(),
        })
    }
}

/// A persisted order with items and metadata deserialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Store-assigned id
    pub id: OrderId,
    /// Ordered lines
    pub items: Vec<OrderItem>,
    /// Total charged
    pub total_price: f64,
    /// Store attributes
    pub store_metadata: StoreMetadata,
    /// Publish latency label
    pub latency_publish: String,
    /// Round-trip latency label
    pub latency_round_trip: String,
    /// When the row was appended
    pub created_at: DateTime<Utc>,
}

/// Success body of an order submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrderResponse {
    /// Human readable status
    pub message: String,
    /// Store-assigned id
    pub order_id: OrderId,
    /// UI-to-API latency, e.g. `"4 ms"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_latency: Option<String>,
    /// Publish latency
    pub pub_sub_latency: String,
    /// Round-trip latency
    pub total_round_trip_latency: String,
}

/// Failure body of any relay endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Failure description
    pub error: String,
}

impl ErrorResponse {
    /// Wrap a submission failure the way clients expect to see it
    pub fn from_submit_error(err: &Error) -> Self {
        Self {
            error: format!("Error processing your order: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn big_mac() -> SubmitOrderRequest {
        SubmitOrderRequest::new(vec![OrderItem::new("Big Mac", 1, 5.99)], 5.99)
            .with_metadata("storeId", "store-1")
    }

    #[test]
    fn test_request_wire_names() {
        let json = r#"{
            "items": [{"name": "Big Mac", "qty": 1, "price": 5.99}],
            "totalPrice": 5.99,
            "storeMetadata": {"storeId": "store-1"},
            "requestStartTime": 1700000000000
        }"#;
        let request: SubmitOrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.items[0].name, "Big Mac");
        assert_eq!(request.request_start_time, Some(1_700_000_000_000));
        assert_eq!(request.store_metadata["storeId"], "store-1");
    }

    #[test]
    fn test_missing_start_time_defaults_to_none() {
        let json = r#"{"items": [], "totalPrice": 0}"#;
        let request: SubmitOrderRequest = serde_json::from_str(json).unwrap();
        assert!(request.request_start_time.is_none());
        assert!(request.store_metadata.is_empty());
    }

    #[test]
    fn test_event_omits_start_time() {
        let request = big_mac().with_request_start_time(1);
        let value = serde_json::to_value(OrderEvent::from(&request)).unwrap();
        assert_eq!(value["totalPrice"], 5.99);
        assert_eq!(value["storeMetadata"]["storeId"], "store-1");
        assert!(value.get("requestStartTime").is_none());
    }

    #[test]
    fn test_new_order_serializes_text_columns() {
        let sample = LatencySample {
            publish: Duration::from_millis(7),
            ui_to_api_ms: 2,
            round_trip: Duration::from_millis(20),
        };
        let row = NewOrder::from_submission(&big_mac(), &sample).unwrap();
        assert_eq!(row.items, r#"[{"name":"Big Mac","qty":1,"price":5.99}]"#);
        assert_eq!(row.store_metadata, r#"{"storeId":"store-1"}"#);
        assert_eq!(row.latency_publish, "7 ms");
        assert_eq!(row.latency_round_trip, "20 ms");
    }

    #[test]
    fn test_response_wire_names() {
        let response = SubmitOrderResponse {
            message: "Order successfully published".into(),
            order_id: 3,
            container_latency: None,
            pub_sub_latency: "4 ms".into(),
            total_round_trip_latency: "9 ms".into(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["orderId"], 3);
        assert_eq!(value["pubSubLatency"], "4 ms");
        assert_eq!(value["totalRoundTripLatency"], "9 ms");
        assert!(value.get("containerLatency").is_none());
    }

    #[test]
    fn test_error_response_text() {
        let err = Error::Transport("topic not found".into());
        let body = ErrorResponse::from_submit_error(&err);
        assert_eq!(
            body.error,
            "Error processing your order: Transport error: topic not found"
        );
    }
}
