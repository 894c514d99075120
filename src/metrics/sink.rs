//! Metric registry backed by a Prometheus recorder.
//!
//! The recorder is built but never installed as the global `metrics`
//! recorder, so every [`MetricSink`] is independent and can be owned and
//! injected like any other value.
//!
//! - counters only go up
//! - gauges are last-write-wins and may be set to any value
//! - histograms share the bucket bounds given at construction and their
//!   counts only accumulate

use metrics::{Counter, Gauge, Histogram, Key, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::Error;

/// Content type of [`MetricSink::render`] output
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Point-in-time view of a histogram, read back from the exposition
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Upper bounds (excluding `+Inf`)
    pub bounds: Vec<f64>,
    /// Cumulative counts per bound, with the `+Inf` count last
    pub cumulative: Vec<u64>,
    /// Sum of observed values
    pub sum: f64,
    /// Number of observations
    pub count: u64,
}

enum Handle {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
}

/// Registry of counters, gauges and histograms.
///
/// # Example
///
/// ```rust
/// use pos_relay::metrics::MetricSink;
///
/// let sink = MetricSink::new(&[5.0, 50.0]).unwrap();
/// sink.register_histogram("total_latency", "Total latency").unwrap();
/// sink.register_gauge("api_latency", "Api latency").unwrap();
///
/// sink.observe_histogram("total_latency", 12.0);
/// sink.set_gauge("api_latency", 12.0);
///
/// assert_eq!(sink.gauge("api_latency"), Some(12.0));
/// assert!(sink.render().contains("total_latency_bucket{le=\"50\"} 1"));
/// ```
pub struct MetricSink {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    handles: RwLock<FxHashMap<String, Handle>>,
}

impl std::fmt::Debug for MetricSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSink")
            .field("metrics", &self.names())
            .finish_non_exhaustive()
    }
}

impl MetricSink {
    /// Create an empty sink whose histograms use `buckets` as upper bounds
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the bounds are empty, not finite or not
    /// strictly increasing.
    pub fn new(buckets: &[f64]) -> Result<Self, Error> {
        if buckets.windows(2).any(|w| w[0] >= w[1]) || buckets.iter().any(|b| !b.is_finite()) {
            return Err(Error::Config(
                "histogram buckets must be finite and strictly increasing".to_string(),
            ));
        }
        let recorder = PrometheusBuilder::new()
            .set_buckets(buckets)
            .map_err(|e| Error::Config(format!("histogram buckets: {}", e)))?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            recorder,
            handle,
            handles: RwLock::new(FxHashMap::default()),
        })
    }

    fn register(&self, name: &str, make: impl FnOnce(&Key, &Metadata<'_>) -> Handle) -> Result<(), Error> {
        let mut handles = self.handles.write();
        if handles.contains_key(name) {
            return Err(Error::Config(format!("metric {} already registered", name)));
        }
        let key = Key::from_name(name.to_string());
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        handles.insert(name.to_string(), make(&key, &metadata));
        Ok(())
    }

    /// Register a counter starting at zero
    pub fn register_counter(&self, name: &str, help: &str) -> Result<(), Error> {
        self.register(name, |key, metadata| {
            Handle::Counter(self.recorder.register_counter(key, metadata))
        })?;
        self.recorder
            .describe_counter(name.to_string().into(), None, help.to_string().into());
        Ok(())
    }

    /// Register a gauge starting at zero
    pub fn register_gauge(&self, name: &str, help: &str) -> Result<(), Error> {
        self.register(name, |key, metadata| {
            Handle::Gauge(self.recorder.register_gauge(key, metadata))
        })?;
        self.recorder
            .describe_gauge(name.to_string().into(), None, help.to_string().into());
        Ok(())
    }

    /// Register a histogram over the sink's buckets
    pub fn register_histogram(&self, name: &str, help: &str) -> Result<(), Error> {
        self.register(name, |key, metadata| {
            Handle::Histogram(self.recorder.register_histogram(key, metadata))
        })?;
        self.recorder
            .describe_histogram(name.to_string().into(), None, help.to_string().into());
        Ok(())
    }

    fn with_handle(&self, name: &str, f: impl FnOnce(&Handle) -> bool) {
        let handles = self.handles.read();
        let applied = handles.get(name).is_some_and(f);
        if !applied {
            tracing::debug!(metric = name, "metric not registered with the expected type");
        }
    }

    /// Record an observation; unknown names are ignored
    pub fn observe_histogram(&self, name: &str, value: f64) {
        self.with_handle(name, |handle| match handle {
            Handle::Histogram(h) => {
                h.record(value);
                true
            }
            _ => false,
        });
    }

    /// Overwrite a gauge; unknown names are ignored
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.with_handle(name, |handle| match handle {
            Handle::Gauge(g) => {
                g.set(value);
                true
            }
            _ => false,
        });
    }

    /// Increase a counter; unknown names are ignored
    pub fn increment_counter(&self, name: &str, by: u64) {
        self.with_handle(name, |handle| match handle {
            Handle::Counter(c) => {
                c.increment(by);
                true
            }
            _ => false,
        });
    }

    fn is_kind(&self, name: &str, f: impl FnOnce(&Handle) -> bool) -> bool {
        self.handles.read().get(name).is_some_and(f)
    }

    /// Current gauge value, as scraped
    pub fn gauge(&self, name: &str) -> Option<f64> {
        if !self.is_kind(name, |h| matches!(h, Handle::Gauge(_))) {
            return None;
        }
        sample(&self.render(), name)?.parse().ok()
    }

    /// Current counter value, as scraped
    pub fn counter(&self, name: &str) -> Option<u64> {
        if !self.is_kind(name, |h| matches!(h, Handle::Counter(_))) {
            return None;
        }
        sample(&self.render(), name)?.parse().ok()
    }

    /// Snapshot of a histogram, as scraped
    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        if !self.is_kind(name, |h| matches!(h, Handle::Histogram(_))) {
            return None;
        }
        let text = self.render();
        let bucket_prefix = format!("{}_bucket{{le=\"", name);

        let mut bounds = Vec::new();
        let mut cumulative = Vec::new();
        for line in text.lines() {
            let Some(rest) = line.strip_prefix(&bucket_prefix) else {
                continue;
            };
            let (le, count) = rest.split_once("\"} ")?;
            if le != "+Inf" {
                bounds.push(le.parse().ok()?);
            }
            cumulative.push(count.parse().ok()?);
        }

        Some(HistogramSnapshot {
            bounds,
            cumulative,
            sum: sample(&text, &format!("{}_sum", name))?.parse().ok()?,
            count: sample(&text, &format!("{}_count", name))?.parse().ok()?,
        })
    }

    /// Registered metric names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handles.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Value of the unlabelled series `series` in an exposition
fn sample<'a>(text: &'a str, series: &str) -> Option<&'a str> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| match line.rsplit_once(' ') {
            Some((name, value)) if name == series => Some(value),
            _ => None,
        })
}
