//! Per-app metric cache.
//!
//! A bounded, timestamp-ordered ring buffer of aggregated metrics. The
//! AppManager keeps one per managed app so the evaluator's range
//! queries usually never touch the store.
//!
//! A query is a *hit* only when the cache provably holds every metric
//! of the requested range: once eviction has happened, ranges reaching
//! at or below the oldest retained timestamp may have lost entries and
//! must go to the store instead.

use std::collections::VecDeque;

use gridscale_models::AppMetric;

/// Bounded time-series buffer for one app's aggregated metrics.
#[derive(Debug)]
pub struct MetricCache {
    items: VecDeque<AppMetric>,
    capacity: usize,
    /// Whether any entry has ever been evicted.
    evicted: bool,
}

impl MetricCache {
    /// Capacity must be positive.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "invalid metric cache capacity");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            evicted: false,
        }
    }

    /// Insert a metric, keeping the buffer ordered by timestamp.
    ///
    /// Equal timestamps keep insertion order. When full, the oldest
    /// entry is dropped; a metric older than everything retained in a
    /// full buffer is dropped immediately.
    pub fn put(&mut self, metric: AppMetric) {
        let idx = self
            .items
            .partition_point(|m| m.timestamp <= metric.timestamp);
        self.items.insert(idx, metric);
        if self.items.len() > self.capacity {
            self.items.pop_front();
            self.evicted = true;
        }
    }

    /// Query metrics of `metric_type` with timestamps in `[start, end)`.
    ///
    /// Returns the matching metrics in ascending order plus a hit flag;
    /// on a miss the contents are not authoritative and the caller must
    /// fall through to the store.
    pub fn query(&self, start: i64, end: i64, metric_type: &str) -> (Vec<AppMetric>, bool) {
        let hit = match self.items.front() {
            None => false, // cold cache
            Some(oldest) => !self.evicted || start > oldest.timestamp,
        };
        if !hit {
            return (Vec::new(), false);
        }
        let result = self
            .items
            .iter()
            .filter(|m| m.timestamp >= start && m.timestamp < end && m.metric_type == metric_type)
            .cloned()
            .collect();
        (result, true)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
