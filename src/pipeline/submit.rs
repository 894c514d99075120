//! Latency-instrumented order submission.
//!
//! A submission runs four side effects in a fixed order:
//!
//! 1. publish the order event to the region topic
//! 2. append the order row to the store
//! 3. observe the latencies in the metric state
//! 4. answer the caller
//!
//! Nothing is retried. A failed publish leaves no row and no observation; a
//! failed append leaves the published message in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::Error;
use crate::metrics::MetricState;
use crate::store::Store;
use crate::transport::Transport;
use crate::types::order::OrderEvent;
use crate::types::{
    ErrorResponse, LatencySample, NewOrder, OrderId, SubmitOrderRequest, SubmitOrderResponse,
};
use crate::Result;

/// Status text of a successful submission
pub const SUCCESS_MESSAGE: &str = "Order successfully published";

/// What a successful submission produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReceipt {
    /// Store-assigned order id
    pub order_id: OrderId,
    /// Transport message id of the published event
    pub message_id: String,
    /// Measured latencies
    pub latency: LatencySample,
}

impl OrderReceipt {
    /// Response body for the caller
    pub fn to_response(&self) -> SubmitOrderResponse {
        SubmitOrderResponse {
            message: SUCCESS_MESSAGE.to_string(),
            order_id: self.order_id,
            container_latency: Some(self.latency.ui_to_api_label()),
            pub_sub_latency: self.latency.publish_label(),
            total_round_trip_latency: self.latency.round_trip_label(),
        }
    }
}

/// Body of a submission reply, success or failure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SubmitReply {
    /// Order published and stored
    Accepted(SubmitOrderResponse),
    /// Submission failed
    Failed(ErrorResponse),
}

/// HTTP status and body a router should answer a submission with
pub fn respond(result: &Result<OrderReceipt>) -> (u16, SubmitReply) {
    match result {
        Ok(receipt) => (200, SubmitReply::Accepted(receipt.to_response())),
        Err(e) => (e.status_code(), SubmitReply::Failed(ErrorResponse::from_submit_error(e))),
    }
}

/// Publishes, stores and measures orders
pub struct SubmissionPipeline {
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    metrics: Arc<MetricState>,
    region_topic: String,
}

impl std::fmt::Debug for SubmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionPipeline")
            .field("region_topic", &self.region_topic)
            .finish_non_exhaustive()
    }
}

impl SubmissionPipeline {
    /// Create a pipeline publishing to `region_topic`
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        metrics: Arc<MetricState>,
        region_topic: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            metrics,
            region_topic: region_topic.into(),
        }
    }

    /// Topic orders are published to
    pub fn region_topic(&self) -> &str {
        &self.region_topic
    }

    /// Submit an order.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `requestStartTime` is missing or not
    ///   positive; nothing is published
    /// - [`Error::Transport`] if publishing fails; nothing is stored
    /// - [`Error::Persistence`] if the store rejects the row; the event has
    ///   already been published
    pub async fn submit(&self, request: &SubmitOrderRequest) -> Result<OrderReceipt> {
        let result = self.process(request).await;
        if let Err(e) = &result {
            self.metrics.record_failure();
            tracing::error!(error = %e, "order submission failed");
        }
        result
    }

    async fn process(&self, request: &SubmitOrderRequest) -> Result<OrderReceipt> {
        let api_start = Instant::now();
        let api_start_ms = Utc::now().timestamp_millis();

        let request_start_ms = match request.request_start_time {
            Some(ms) if ms > 0 => ms,
            Some(ms) => {
                return Err(Error::Validation(format!(
                    "requestStartTime must be positive, got {}",
                    ms
                )))
            }
            None => {
                return Err(Error::Validation(
                    "missing required field: requestStartTime".into(),
                ))
            }
        };

        let payload = serde_json::to_vec(&OrderEvent::from(request))?;

        let publish_start = Instant::now();
        let message_id = self
            .transport
            .publish(&self.region_topic, payload)
            .await
            .map_err(Error::into_transport)?;
        let publish = publish_start.elapsed();

        let ui_to_api_ms = api_start_ms - request_start_ms;
        let latency = LatencySample {
            publish,
            ui_to_api_ms,
            round_trip: round_trip(ui_to_api_ms, api_start.elapsed(), publish),
        };

        let row = NewOrder::from_submission(request, &latency)?;
        let order_id = self
            .store
            .append_order(row)
            .await
            .map_err(Error::into_persistence)?;

        self.metrics.record_submission(&latency);
        tracing::info!(
            order_id,
            message_id = %message_id,
            publish_ms = latency.publish_ms(),
            ui_to_api_ms,
            round_trip_ms = latency.round_trip_ms(),
            "order published"
        );

        Ok(OrderReceipt {
            order_id,
            message_id,
            latency,
        })
    }
}

/// Client start to now: the client-side lead time plus our own elapsed time.
///
/// Never less than `publish`, which keeps the round trip at or above the
/// publish latency when the client clock runs ahead of ours.
fn round_trip(ui_to_api_ms: i64, since_api_start: Duration, publish: Duration) -> Duration {
    let lead = Duration::from_millis(ui_to_api_ms.unsigned_abs());
    let total = if ui_to_api_ms >= 0 {
        since_api_start.saturating_add(lead)
    } else {
        since_api_start.saturating_sub(lead)
    };
    total.max(publish)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LATENCY_BUCKETS;
    use crate::metrics::names;
    use crate::store::MemoryStore;
    use crate::transport::MemoryTransport;
    use crate::types::OrderItem;

    struct Fixture {
        transport: MemoryTransport,
        store: Arc<MemoryStore>,
        metrics: Arc<MetricState>,
        pipeline: SubmissionPipeline,
    }

    fn fixture() -> Fixture {
        let transport = MemoryTransport::new();
        let store = Arc::new(MemoryStore::with_default_menu());
        let metrics = Arc::new(MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap());
        let pipeline = SubmissionPipeline::new(
            Arc::new(transport.clone()),
            store.clone(),
            metrics.clone(),
            "TopicRegionUSA",
        );
        Fixture {
            transport,
            store,
            metrics,
            pipeline,
        }
    }

    fn big_mac(start_ms: i64) -> SubmitOrderRequest {
        SubmitOrderRequest::new(vec![OrderItem::new("Big Mac", 1, 5.99)], 5.99)
            .with_metadata("storeId", "store-1")
            .with_request_start_time(start_ms)
    }

    #[test]
    fn test_round_trip_arithmetic() {
        let ms = Duration::from_millis;
        assert_eq!(round_trip(50, ms(10), ms(4)), ms(60));
        assert_eq!(round_trip(0, ms(10), ms(4)), ms(10));
        assert_eq!(round_trip(-3, ms(10), ms(4)), ms(7));
        assert_eq!(round_trip(-500, ms(10), ms(4)), ms(4));
    }

    #[tokio::test]
    async fn test_submit_publishes_then_stores() {
        let f = fixture();
        let start = Utc::now().timestamp_millis() - 50;
        let receipt = f.pipeline.submit(&big_mac(start)).await.unwrap();

        assert_eq!(receipt.order_id, 1);
        assert!(receipt.latency.ui_to_api_ms >= 50);
        assert!(receipt.latency.round_trip >= receipt.latency.publish);
        assert!(receipt.latency.round_trip_ms() >= 50);

        let published = f.transport.published("TopicRegionUSA");
        assert_eq!(published.len(), 1);
        let event: serde_json::Value = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(event["items"][0]["name"], "Big Mac");
        assert_eq!(event["storeMetadata"]["storeId"], "store-1");

        assert_eq!(f.store.order_count(), 1);
        assert_eq!(f.metrics.sink().counter(names::ORDERS_SUBMITTED), Some(1));
    }

    #[tokio::test]
    async fn test_missing_or_zero_start_time_is_rejected() {
        let f = fixture();
        let mut request = big_mac(1);
        request.request_start_time = None;
        let err = f.pipeline.submit(&request).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = f.pipeline.submit(&big_mac(0)).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        assert!(f.transport.published("TopicRegionUSA").is_empty());
        assert_eq!(f.store.order_count(), 0);
        assert_eq!(f.metrics.sink().counter(names::ORDERS_FAILED), Some(2));
    }

    #[tokio::test]
    async fn test_future_start_time_keeps_round_trip_above_publish() {
        let f = fixture();
        let start = Utc::now().timestamp_millis() + 60_000;
        let receipt = f.pipeline.submit(&big_mac(start)).await.unwrap();

        assert!(receipt.latency.ui_to_api_ms < 0);
        assert_eq!(receipt.latency.round_trip, receipt.latency.publish);
        assert!(receipt.to_response().container_latency.unwrap().starts_with('-'));
    }

    #[tokio::test]
    async fn test_publish_failure_stores_nothing() {
        let f = fixture();
        f.transport.set_fail_publish(true);
        let err = f
            .pipeline
            .submit(&big_mac(Utc::now().timestamp_millis()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(f.store.order_count(), 0);
        assert_eq!(
            f.metrics.sink().histogram(names::PUB_SUB_LATENCY).unwrap().count,
            0
        );
    }

    #[tokio::test]
    async fn test_store_failure_after_publish() {
        let f = fixture();
        f.store.set_available(false);
        let result = f
            .pipeline
            .submit(&big_mac(Utc::now().timestamp_millis()))
            .await;

        let (status, reply) = respond(&result);
        assert_eq!(status, 500);
        match reply {
            SubmitReply::Failed(body) => {
                assert!(body.error.starts_with("Error processing your order: Persistence error"))
            }
            SubmitReply::Accepted(_) => panic!("expected failure"),
        }
        assert_eq!(f.transport.published("TopicRegionUSA").len(), 1);
        assert_eq!(f.metrics.sink().histogram(names::TOTAL_LATENCY).unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_success_reply_shape() {
        let f = fixture();
        let result = f
            .pipeline
            .submit(&big_mac(Utc::now().timestamp_millis() - 5))
            .await;
        let (status, reply) = respond(&result);
        assert_eq!(status, 200);

        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["message"], SUCCESS_MESSAGE);
        assert_eq!(value["orderId"], 1);
        assert!(value["pubSubLatency"].as_str().unwrap().ends_with(" ms"));
        assert!(value["totalRoundTripLatency"].as_str().unwrap().ends_with(" ms"));
        assert!(value["containerLatency"].as_str().unwrap().ends_with(" ms"));
    }
}
