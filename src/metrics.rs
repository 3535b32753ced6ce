use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(u64, u64)>,
    sum_ms: u64,
    count: u64,
    max_ms: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: vec![(1, 0), (5, 0), (10, 0), (50, 0), (100, 0), (500, 0), (1000, 0), (5000, 0)],
            sum_ms: 0,
            count: 0,
            max_ms: 0,
        }
    }

    pub fn observe(&mut self, value_ms: u64) {
        self.sum_ms += value_ms;
        self.count += 1;
        self.max_ms = self.max_ms.max(value_ms);

        for (threshold, count) in &mut self.buckets {
            if value_ms <= *threshold {
                *count += 1;
                break;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum_ms as f64 / self.count as f64 }
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// `(upper bound ms, count)` pairs. Values above the last bound are only in `max_ms`.
    pub fn buckets(&self) -> &[(u64, u64)] {
        &self.buckets
    }

    /// Upper bound of the bucket holding the `pct` percentile; `max_ms` past the last bucket.
    pub fn percentile_ms(&self, pct: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let target = ((self.count as f64) * pct / 100.0).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (threshold, count) in &self.buckets {
            seen += count;
            if seen >= target {
                return (*threshold).min(self.max_ms);
            }
        }
        self.max_ms
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free counter.
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct FrontierMetrics {
    pub scheduled: Counter,
    pub duplicates: Counter,
    pub rejected: Counter,
    pub emitted: Counter,
    pub succeeded: Counter,
    pub failed: Counter,
    pub rescheduled: Counter,
    pub spill_writes: Counter,
    pub spill_reads: Counter,
    pub journal_records: Counter,
    pub journal_errors: Counter,
    pub journal_flush_latency: Mutex<Histogram>,
}

impl FrontierMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_journal_flush(&self, duration: Duration) {
        self.journal_flush_latency.lock().observe(duration.as_millis() as u64);
    }

    pub fn journal_flush_snapshot(&self) -> Histogram {
        self.journal_flush_latency.lock().clone()
    }
}

pub type SharedMetrics = Arc<FrontierMetrics>;
