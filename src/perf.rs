//! Perf sink (C12): a pluggable, zero-cost-by-default metrics capability.

use std::sync::atomic::{AtomicU64, Ordering};

/// Observation capability threaded through the workflow and evaluator.
///
/// The production path uses [`NullPerfSink`], which discards every call
/// without branching on whether observation is "enabled" — callers never
/// need to check.
pub trait PerfSink: Send + Sync {
    /// Increments a named counter by one.
    fn increment(&self, name: &str);
    /// Records a duration, in milliseconds, for a named timer.
    fn observe_duration_ms(&self, name: &str, ms: u64);
    /// Records an arbitrary scalar observation for a named gauge.
    fn observe_value(&self, name: &str, value: f64);
}

/// Discards every observation. The default in production paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPerfSink;

impl PerfSink for NullPerfSink {
    #[inline]
    fn increment(&self, _name: &str) {}
    #[inline]
    fn observe_duration_ms(&self, _name: &str, _ms: u64) {}
    #[inline]
    fn observe_value(&self, _name: &str, _value: f64) {}
}

/// Records observations in memory; useful for tests and benchmark harnesses.
#[derive(Default)]
pub struct RecordingPerfSink {
    counters: parking_lot::Mutex<std::collections::HashMap<String, AtomicU64>>,
}

impl RecordingPerfSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of a named counter (0 if never incremented).
    pub fn count(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl PerfSink for RecordingPerfSink {
    fn increment(&self, name: &str) {
        let mut map = self.counters.lock();
        map.entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn observe_duration_ms(&self, _name: &str, _ms: u64) {}
    fn observe_value(&self, _name: &str, _value: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_counts_increments() {
        let sink = RecordingPerfSink::new();
        sink.increment("cache_hit");
        sink.increment("cache_hit");
        sink.increment("cache_miss");
        assert_eq!(sink.count("cache_hit"), 2);
        assert_eq!(sink.count("cache_miss"), 1);
        assert_eq!(sink.count("unused"), 0);
    }

    #[test]
    fn null_sink_never_panics() {
        let sink = NullPerfSink;
        sink.increment("x");
        sink.observe_duration_ms("y", 10);
        sink.observe_value("z", 1.0);
    }
}
