//! Zeroes the latency gauges once the relay has gone quiet.
//!
//! Gauges hold the last observed value, so without this a dashboard keeps
//! showing the latency of the final order of a burst indefinitely.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use crate::metrics::MetricState;

/// Periodic idle check over the metric state
#[derive(Debug, Clone)]
pub struct IdleDecay {
    metrics: Arc<MetricState>,
    period: Duration,
    idle_threshold: Duration,
}

impl IdleDecay {
    /// Check every `period`; reset after more than `idle_threshold` without activity
    pub fn new(metrics: Arc<MetricState>, period: Duration, idle_threshold: Duration) -> Self {
        Self {
            metrics,
            period,
            idle_threshold,
        }
    }

    /// Run one check now; returns whether the gauges were reset
    pub fn tick(&self) -> bool {
        self.tick_at(Instant::now())
    }

    /// Run one check as of `now`
    pub fn tick_at(&self, now: Instant) -> bool {
        match self.metrics.reset_if_idle(now, self.idle_threshold) {
            Some(idle) => {
                let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(idle_ms, "latency gauges reset");
                true
            }
            None => false,
        }
    }

    /// Check on every period until shutdown is signalled
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        tracing::debug!("idle decay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LATENCY_BUCKETS;
    use crate::metrics::names;
    use crate::types::LatencySample;

    fn sample() -> LatencySample {
        LatencySample {
            publish: Duration::from_millis(12),
            ui_to_api_ms: 3,
            round_trip: Duration::from_millis(40),
        }
    }

    fn decay() -> (Arc<MetricState>, IdleDecay) {
        let metrics = Arc::new(MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap());
        let decay = IdleDecay::new(metrics.clone(), Duration::from_secs(2), Duration::from_secs(1));
        (metrics, decay)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_resets_only_after_threshold() {
        let (metrics, decay) = decay();
        metrics.record_submission(&sample());

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(!decay.tick());
        assert_eq!(metrics.sink().gauge(names::API_LATENCY), Some(40.0));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(decay.tick());
        for name in names::DECAYING_GAUGES {
            assert_eq!(metrics.sink().gauge(name), Some(0.0));
        }
        assert_eq!(metrics.sink().histogram(names::TOTAL_LATENCY).unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_decays_on_schedule() {
        let (metrics, decay) = decay();
        metrics.record_submission(&sample());
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(async move { decay.run(rx).await });

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(metrics.sink().gauge(names::INDIVIDUAL_PUB_SUB_LATENCY), Some(12.0));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(metrics.sink().gauge(names::INDIVIDUAL_PUB_SUB_LATENCY), Some(0.0));

        metrics.record_submission(&sample());
        assert_eq!(metrics.sink().gauge(names::INDIVIDUAL_PUB_SUB_LATENCY), Some(12.0));

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
