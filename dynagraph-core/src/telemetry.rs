use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// A lock-free latency histogram.
/// Buckets: [1us, 10us, 50us, 100us, 200us, 500us, 1ms, 5ms, 10ms, 50ms, 100ms, 500ms+]
#[derive(Debug)]
pub struct LiveHistogram {
    buckets: [AtomicU64; 12],
}

const THRESHOLDS_US: [u64; 12] = [1, 10, 50, 100, 200, 500, 1000, 5000, 10000, 50000, 100000, 500000];

impl Default for LiveHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveHistogram {
    pub fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self { buckets: [ZERO; 12] }
    }

    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        let idx = THRESHOLDS_US
            .iter()
            .position(|&t| us < t)
            .unwrap_or(THRESHOLDS_US.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }

    /// Upper bound (in microseconds) of the bucket holding the `p` quantile.
    pub fn calculate_percentile(&self, p: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        let target = ((total as f64 * p).ceil() as u64).max(1);
        let mut count = 0;
        for (i, b) in self.buckets.iter().enumerate() {
            count += b.load(Ordering::Relaxed);
            if count >= target {
                return THRESHOLDS_US[i];
            }
        }
        THRESHOLDS_US[THRESHOLDS_US.len() - 1]
    }
}

/// Running counters of the index's structural work.
#[derive(Debug, Default)]
pub struct IndexStats {
    pub flushes: AtomicU64,
    pub clusters_built: AtomicU64,
    pub bridge_edges: AtomicU64,
    pub promoted_entry_points: AtomicU64,
    pub incremental_inserts: AtomicU64,
    pub repaired_slots: AtomicU64,
    pub queries: AtomicU64,
    pub compactions: AtomicU64,
    pub insert_latency: LiveHistogram,
    pub query_latency: LiveHistogram,
}

impl IndexStats {
    #[inline]
    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            flushes: load(&self.flushes),
            clusters_built: load(&self.clusters_built),
            bridge_edges: load(&self.bridge_edges),
            promoted_entry_points: load(&self.promoted_entry_points),
            incremental_inserts: load(&self.incremental_inserts),
            repaired_slots: load(&self.repaired_slots),
            queries: load(&self.queries),
            compactions: load(&self.compactions),
            insert_p50_us: self.insert_latency.calculate_percentile(0.50),
            insert_p99_us: self.insert_latency.calculate_percentile(0.99),
            query_p50_us: self.query_latency.calculate_percentile(0.50),
            query_p99_us: self.query_latency.calculate_percentile(0.99),
        }
    }
}

/// Point-in-time copy of `IndexStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub flushes: u64,
    pub clusters_built: u64,
    pub bridge_edges: u64,
    pub promoted_entry_points: u64,
    pub incremental_inserts: u64,
    pub repaired_slots: u64,
    pub queries: u64,
    pub compactions: u64,
    pub insert_p50_us: u64,
    pub insert_p99_us: u64,
    pub query_p50_us: u64,
    pub query_p99_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_pick_bucket_bounds() {
        let h = LiveHistogram::new();
        for _ in 0..98 {
            h.record(Duration::from_micros(5));
        }
        h.record(Duration::from_millis(2));
        h.record(Duration::from_secs(1));
        assert_eq!(h.count(), 100);
        assert_eq!(h.calculate_percentile(0.50), 10);
        assert_eq!(h.calculate_percentile(0.99), 5000);
        assert_eq!(h.calculate_percentile(1.0), 500000);
    }

    #[test]
    fn test_empty_histogram() {
        assert_eq!(LiveHistogram::new().calculate_percentile(0.99), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = IndexStats::default();
        IndexStats::add(&stats.flushes, 2);
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"flushes\":2"));
    }
}
