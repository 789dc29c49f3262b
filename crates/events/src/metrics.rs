//! Bus-level latency and error counters.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot returned by [`crate::EventBus::metrics`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusMetrics {
    /// Events that reached handler dispatch (i.e. passed all middleware).
    pub events_processed: u64,
    /// Handler invocations that returned an error or panicked.
    pub events_failed: u64,
    /// Mean dispatch latency over all processed events.
    pub average_latency: Duration,
    /// Mean latency per handler name.
    pub handler_latency: HashMap<String, Duration>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    current: BusMetrics,
    handler_calls: HashMap<String, u64>,
}

impl MetricsRecorder {
    pub(crate) fn record_event(&mut self, latency: Duration) {
        self.current.events_processed += 1;
        self.current.average_latency = incremental_mean(
            self.current.average_latency,
            latency,
            self.current.events_processed,
        );
        self.current.last_event_at = Some(Utc::now());
    }

    pub(crate) fn record_handler(&mut self, handler: &str, latency: Duration) {
        let calls = self.handler_calls.entry(handler.to_owned()).or_insert(0);
        *calls += 1;
        let mean = self
            .current
            .handler_latency
            .entry(handler.to_owned())
            .or_default();
        *mean = incremental_mean(*mean, latency, *calls);
    }

    pub(crate) fn record_failure(&mut self) {
        self.current.events_failed += 1;
    }

    pub(crate) fn snapshot(&self) -> BusMetrics {
        self.current.clone()
    }
}

fn incremental_mean(mean: Duration, sample: Duration, count: u64) -> Duration {
    if count == 0 {
        return sample;
    }
    let mean_secs = mean.as_secs_f64();
    let next = mean_secs + (sample.as_secs_f64() - mean_secs) / count as f64;
    Duration::from_secs_f64(next.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_latency_is_running_mean() {
        let mut recorder = MetricsRecorder::default();
        recorder.record_event(Duration::from_millis(10));
        recorder.record_event(Duration::from_millis(30));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.events_processed, 2);
        let avg = snapshot.average_latency.as_secs_f64();
        assert!((avg - 0.020).abs() < 1e-6, "got {avg}");
        assert!(snapshot.last_event_at.is_some());
    }

    #[test]
    fn handler_latency_is_tracked_per_name() {
        let mut recorder = MetricsRecorder::default();
        recorder.record_handler("a", Duration::from_millis(4));
        recorder.record_handler("a", Duration::from_millis(8));
        recorder.record_handler("b", Duration::from_millis(1));

        let snapshot = recorder.snapshot();
        let a = snapshot.handler_latency["a"].as_secs_f64();
        assert!((a - 0.006).abs() < 1e-6, "got {a}");
        let b = snapshot.handler_latency["b"].as_secs_f64();
        assert!((b - 0.001).abs() < 1e-6, "got {b}");
    }
}
