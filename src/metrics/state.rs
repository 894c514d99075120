//! Relay-wide latency metrics and activity tracking.

use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::sink::MetricSink;
use crate::Result;
use crate::types::LatencySample;

/// Metric names exposed by the relay
pub mod names {
    /// Histogram of publish latency (ms)
    pub const PUB_SUB_LATENCY: &str = "pub_sub_latency";
    /// Histogram of round-trip latency (ms)
    pub const TOTAL_LATENCY: &str = "total_latency";
    /// Gauge with the latest publish latency (ms)
    pub const INDIVIDUAL_PUB_SUB_LATENCY: &str = "individual_pub_sub_latency";
    /// Gauge with the latest round-trip latency (ms)
    pub const API_LATENCY: &str = "api_latency";
    /// Gauge with the latest UI-to-API latency (ms)
    pub const UI_LATENCY: &str = "ui_latency";
    /// Orders published and stored
    pub const ORDERS_SUBMITTED: &str = "orders_submitted_total";
    /// Order submissions that failed
    pub const ORDERS_FAILED: &str = "orders_failed_total";
    /// Price updates applied to the menu
    pub const MENU_UPDATES_APPLIED: &str = "menu_updates_applied_total";
    /// Price updates nacked
    pub const MENU_UPDATES_REJECTED: &str = "menu_updates_rejected_total";
    /// Process start, seconds since Unix epoch
    pub const PROCESS_START_TIME: &str = "process_start_time_seconds";

    /// Gauges zeroed when the relay goes idle
    pub const DECAYING_GAUGES: [&str; 3] = [API_LATENCY, INDIVIDUAL_PUB_SUB_LATENCY, UI_LATENCY];
}

/// The relay's metrics, created once and shared by every component.
#[derive(Debug)]
pub struct MetricState {
    sink: MetricSink,
    last_activity: Mutex<Instant>,
}

impl MetricState {
    /// Register all relay metrics with the given latency bucket bounds (ms)
    pub fn new(buckets: &[f64]) -> Result<Self> {
        let sink = MetricSink::new(buckets)?;

        sink.register_histogram(
            names::PUB_SUB_LATENCY,
            "Latency of publishing an order to Pub/Sub in milliseconds",
        )?;
        sink.register_histogram(
            names::TOTAL_LATENCY,
            "Round-trip latency of an order submission in milliseconds",
        )?;
        sink.register_gauge(
            names::INDIVIDUAL_PUB_SUB_LATENCY,
            "Publish latency of the latest order in milliseconds",
        )?;
        sink.register_gauge(
            names::API_LATENCY,
            "Round-trip latency of the latest order in milliseconds",
        )?;
        sink.register_gauge(
            names::UI_LATENCY,
            "UI to API latency of the latest order in milliseconds",
        )?;
        sink.register_counter(names::ORDERS_SUBMITTED, "Orders published and stored")?;
        sink.register_counter(names::ORDERS_FAILED, "Order submissions that failed")?;
        sink.register_counter(names::MENU_UPDATES_APPLIED, "Menu price updates applied")?;
        sink.register_counter(names::MENU_UPDATES_REJECTED, "Menu price updates rejected")?;
        sink.register_gauge(
            names::PROCESS_START_TIME,
            "Start time of the process since unix epoch in seconds",
        )?;
        sink.set_gauge(
            names::PROCESS_START_TIME,
            Utc::now().timestamp_millis() as f64 / 1000.0,
        );

        Ok(Self {
            sink,
            last_activity: Mutex::new(Instant::now()),
        })
    }

    /// Underlying sink, for point reads
    pub fn sink(&self) -> &MetricSink {
        &self.sink
    }

    /// Record a successful submission and mark the relay active
    ///
    /// Gauges and the activity instant change under the activity lock, so an
    /// idle reset never lands between them.
    pub fn record_submission(&self, sample: &LatencySample) {
        let publish = sample.publish_ms() as f64;
        let round_trip = sample.round_trip_ms() as f64;

        let mut last_activity = self.last_activity.lock();
        self.sink.observe_histogram(names::PUB_SUB_LATENCY, publish);
        self.sink.set_gauge(names::INDIVIDUAL_PUB_SUB_LATENCY, publish);
        self.sink.observe_histogram(names::TOTAL_LATENCY, round_trip);
        self.sink.set_gauge(names::API_LATENCY, round_trip);
        self.sink.set_gauge(names::UI_LATENCY, sample.ui_to_api_ms as f64);
        self.sink.increment_counter(names::ORDERS_SUBMITTED, 1);
        *last_activity = Instant::now();
    }

    /// Count a failed submission
    pub fn record_failure(&self) {
        self.sink.increment_counter(names::ORDERS_FAILED, 1);
    }

    /// Count a handled price update
    pub fn record_update(&self, applied: bool) {
        let name = if applied {
            names::MENU_UPDATES_APPLIED
        } else {
            names::MENU_UPDATES_REJECTED
        };
        self.sink.increment_counter(name, 1);
    }

    /// Mark the relay active now
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Instant of the last successful submission (or construction)
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since the last activity, as of `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Zero the latency gauges; histograms and counters are left alone
    pub fn reset_latency_gauges(&self) {
        for name in names::DECAYING_GAUGES {
            self.sink.set_gauge(name, 0.0);
        }
    }

    /// Zero the latency gauges if the relay has been idle for longer than
    /// `threshold` as of `now`; returns the idle time when it did.
    ///
    /// The check and the reset hold the activity lock, so a submission
    /// recorded concurrently is either reset with the rest or seen as fresh.
    pub fn reset_if_idle(&self, now: Instant, threshold: Duration) -> Option<Duration> {
        let last_activity = self.last_activity.lock();
        let idle = now.saturating_duration_since(*last_activity);
        if idle > threshold {
            self.reset_latency_gauges();
            Some(idle)
        } else {
            None
        }
    }

    /// Scrape output in the Prometheus text format
    pub fn render(&self) -> String {
        self.sink.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LATENCY_BUCKETS;

    fn sample(publish_ms: u64, ui_to_api_ms: i64, round_trip_ms: u64) -> LatencySample {
        LatencySample {
            publish: Duration::from_millis(publish_ms),
            ui_to_api_ms,
            round_trip: Duration::from_millis(round_trip_ms),
        }
    }

    #[test]
    fn test_record_submission_updates_everything() {
        let state = MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap();
        state.record_submission(&sample(4, 10, 30));

        let sink = state.sink();
        assert_eq!(sink.gauge(names::INDIVIDUAL_PUB_SUB_LATENCY), Some(4.0));
        assert_eq!(sink.gauge(names::API_LATENCY), Some(30.0));
        assert_eq!(sink.gauge(names::UI_LATENCY), Some(10.0));
        assert_eq!(sink.histogram(names::PUB_SUB_LATENCY).unwrap().count, 1);
        assert_eq!(sink.histogram(names::TOTAL_LATENCY).unwrap().count, 1);
        assert_eq!(sink.counter(names::ORDERS_SUBMITTED), Some(1));
    }

    #[test]
    fn test_reset_leaves_histograms() {
        let state = MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap();
        state.record_submission(&sample(4, 10, 30));
        state.reset_latency_gauges();

        for name in names::DECAYING_GAUGES {
            assert_eq!(state.sink().gauge(name), Some(0.0));
        }
        assert_eq!(state.sink().histogram(names::TOTAL_LATENCY).unwrap().count, 1);
        assert!(state.sink().gauge(names::PROCESS_START_TIME).unwrap() > 0.0);
    }

    #[test]
    fn test_update_counters() {
        let state = MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap();
        state.record_update(true);
        state.record_update(false);
        state.record_update(false);
        state.record_failure();

        assert_eq!(state.sink().counter(names::MENU_UPDATES_APPLIED), Some(1));
        assert_eq!(state.sink().counter(names::MENU_UPDATES_REJECTED), Some(2));
        assert_eq!(state.sink().counter(names::ORDERS_FAILED), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_for_tracks_touch() {
        let state = MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(state.idle_for(Instant::now()), Duration::from_millis(1500));

        state.touch();
        assert_eq!(state.idle_for(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_reset_never_erases_a_concurrent_submission() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let threshold = Duration::from_millis(30);
        let state = Arc::new(MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap());

        for _ in 0..20 {
            std::thread::sleep(threshold + Duration::from_millis(5));

            let stop = Arc::new(AtomicBool::new(false));
            let ticker = {
                let state = state.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        state.reset_if_idle(Instant::now(), threshold);
                    }
                })
            };

            state.record_submission(&sample(4, 10, 30));
            let fresh = state.idle_for(Instant::now()) < threshold;
            let gauge = state.sink().gauge(names::INDIVIDUAL_PUB_SUB_LATENCY);

            stop.store(true, Ordering::Relaxed);
            ticker.join().unwrap();

            if fresh {
                assert_eq!(gauge, Some(4.0), "gauges reset after a fresh submission");
            }
        }
    }
}
