//! Latency metrics.
//!
//! [`MetricSink`] is a small registry of counters, gauges and histograms that
//! renders the Prometheus text format. [`MetricState`] registers the relay's
//! metrics on a sink and is shared (behind an `Arc`) by the submission
//! pipeline, the update listener and the idle decay task.

mod sink;
mod state;

pub use sink::{HistogramSnapshot, MetricSink, CONTENT_TYPE};
pub use state::{names, MetricState};
