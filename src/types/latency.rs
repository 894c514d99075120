//! Latency measurements taken while submitting an order.

use std::time::Duration;

/// The three latencies measured for one submission.
///
/// `publish` and `round_trip` come from the monotonic clock and are never
/// negative. `ui_to_api_ms` compares the client's wall clock with ours and is
/// passed through as measured, so it goes negative when the client clock runs
/// ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    /// Time spent inside `Transport::publish`
    pub publish: Duration,
    /// Client request start to API processing start
    pub ui_to_api_ms: i64,
    /// Client request start to the moment the response is assembled
    pub round_trip: Duration,
}

impl LatencySample {
    /// Publish latency in whole milliseconds
    pub fn publish_ms(&self) -> i64 {
        duration_ms(self.publish)
    }

    /// Round-trip latency in whole milliseconds
    pub fn round_trip_ms(&self) -> i64 {
        duration_ms(self.round_trip)
    }

    /// Publish latency as stored and returned, e.g. `"12 ms"`
    pub fn publish_label(&self) -> String {
        format_ms(self.publish_ms())
    }

    /// UI-to-API latency as returned, e.g. `"-3 ms"`
    pub fn ui_to_api_label(&self) -> String {
        format_ms(self.ui_to_api_ms)
    }

    /// Round-trip latency as stored and returned
    pub fn round_trip_label(&self) -> String {
        format_ms(self.round_trip_ms())
    }
}

/// Format a millisecond count the way orders store and return it
pub fn format_ms(ms: i64) -> String {
    format!("{} ms", ms)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
