//! Lock-free metrics collection and periodic reporting
//!
//! Counters are updated from the poll loop and the MQTT supervisor with
//! Relaxed atomics. They are statistics only, never used for control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Poll cycle duration bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(duration_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < duration_us)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Upper bound of the bucket holding the given percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile).ceil() as u64;
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector for the reader node
pub struct Metrics {
    /// Reader polls (monotonic)
    polls_total: AtomicU64,
    /// Cards detected and selected (monotonic)
    cards_total: AtomicU64,
    /// Sector blocks read successfully (monotonic)
    nfc_reads_total: AtomicU64,
    /// Sector-memory tags that fell back to identifier-only (monotonic)
    nfc_degraded_total: AtomicU64,
    /// Reads suppressed as duplicates (monotonic)
    suppressed_total: AtomicU64,
    /// Events handed to the transport (monotonic)
    published_total: AtomicU64,
    /// Events dropped by the transport (monotonic)
    publish_failed_total: AtomicU64,
    /// Broker connections established (monotonic)
    connects_total: AtomicU64,
    /// Broker connection errors (monotonic)
    connection_errors_total: AtomicU64,
    /// Events published since last report (reset on report)
    published_since_report: AtomicU64,
    /// Poll cycle duration histogram (reset on report)
    cycle_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Max poll cycle duration (reset on report)
    cycle_max_us: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            polls_total: AtomicU64::new(0),
            cards_total: AtomicU64::new(0),
            nfc_reads_total: AtomicU64::new(0),
            nfc_degraded_total: AtomicU64::new(0),
            suppressed_total: AtomicU64::new(0),
            published_total: AtomicU64::new(0),
            publish_failed_total: AtomicU64::new(0),
            connects_total: AtomicU64::new(0),
            connection_errors_total: AtomicU64::new(0),
            published_since_report: AtomicU64::new(0),
            cycle_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            cycle_max_us: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_poll(&self, cycle_us: u64) {
        self.polls_total.fetch_add(1, Ordering::Relaxed);
        self.cycle_buckets[bucket_index(cycle_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.cycle_max_us, cycle_us);
    }

    #[inline]
    pub fn record_card(&self) {
        self.cards_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_nfc_read(&self) {
        self.nfc_reads_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_nfc_degraded(&self) {
        self.nfc_degraded_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_suppressed(&self) {
        self.suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self) {
        self.published_total.fetch_add(1, Ordering::Relaxed);
        self.published_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_failed(&self) {
        self.publish_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connected(&self) {
        self.connects_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection_error(&self) {
        self.connection_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published_total(&self) -> u64 {
        self.published_total.load(Ordering::Relaxed)
    }

    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total.load(Ordering::Relaxed)
    }

    pub fn publish_failed_total(&self) -> u64 {
        self.publish_failed_total.load(Ordering::Relaxed)
    }

    /// Snapshot counters, resetting the per-interval ones
    pub fn report(&self) -> MetricsSummary {
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let mut cycle_buckets = [0u64; METRICS_NUM_BUCKETS];
        for (i, bucket) in self.cycle_buckets.iter().enumerate() {
            cycle_buckets[i] = bucket.swap(0, Ordering::Relaxed);
        }

        let published_interval = self.published_since_report.swap(0, Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        let published_per_min =
            if secs > 0.0 { published_interval as f64 * 60.0 / secs } else { 0.0 };

        MetricsSummary {
            polls_total: self.polls_total.load(Ordering::Relaxed),
            cards_total: self.cards_total.load(Ordering::Relaxed),
            nfc_reads_total: self.nfc_reads_total.load(Ordering::Relaxed),
            nfc_degraded_total: self.nfc_degraded_total.load(Ordering::Relaxed),
            suppressed_total: self.suppressed_total.load(Ordering::Relaxed),
            published_total: self.published_total.load(Ordering::Relaxed),
            publish_failed_total: self.publish_failed_total.load(Ordering::Relaxed),
            connects_total: self.connects_total.load(Ordering::Relaxed),
            connection_errors_total: self.connection_errors_total.load(Ordering::Relaxed),
            published_per_min,
            cycle_p99_us: percentile_from_buckets(&cycle_buckets, 0.99),
            cycle_max_us: self.cycle_max_us.swap(0, Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub polls_total: u64,
    pub cards_total: u64,
    pub nfc_reads_total: u64,
    pub nfc_degraded_total: u64,
    pub suppressed_total: u64,
    pub published_total: u64,
    pub publish_failed_total: u64,
    pub connects_total: u64,
    pub connection_errors_total: u64,
    pub published_per_min: f64,
    pub cycle_p99_us: u64,
    pub cycle_max_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            polls = %self.polls_total,
            cards = %self.cards_total,
            nfc_reads = %self.nfc_reads_total,
            nfc_degraded = %self.nfc_degraded_total,
            suppressed = %self.suppressed_total,
            published = %self.published_total,
            publish_failed = %self.publish_failed_total,
            connects = %self.connects_total,
            connection_errors = %self.connection_errors_total,
            published_per_min = %format!("{:.1}", self.published_per_min),
            cycle_p99_us = %self.cycle_p99_us,
            cycle_max_us = %self.cycle_max_us,
            "metrics"
        );
    }
}
