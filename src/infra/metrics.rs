//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations so the reader task never contends on
//! a lock. Reporting swaps the per-interval counters to get a snapshot.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; never use them for coordination.

use crate::domain::events::EventKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;
const NUM_KINDS: usize = EventKind::ALL.len();

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Read all buckets without resetting them
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Lines read from the portal (monotonic)
    lines_total: AtomicU64,
    /// Lines since last report (reset on report)
    lines_since_report: AtomicU64,
    /// Sum of per-line processing latency (reset on report)
    latency_sum_us: AtomicU64,
    /// Max per-line processing latency (reset on report)
    latency_max_us: AtomicU64,
    /// Per-line processing latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Published events by kind, indexed by `EventKind::index`
    events_by_kind: [AtomicU64; NUM_KINDS],
    unknown_total: AtomicU64,
    setup_total: AtomicU64,
    malformed_total: AtomicU64,
    occupancies_total: AtomicU64,
    /// Closed occupancies with at least one alarm flag set
    alarm_occupancies_total: AtomicU64,
    gamma_alarm_occupancies_total: AtomicU64,
    neutron_alarm_occupancies_total: AtomicU64,
    /// `GX` received with no open occupancy
    idle_closes_total: AtomicU64,
    stream_failures_total: AtomicU64,
    reconnects_total: AtomicU64,
    publish_dropped_total: AtomicU64,
    connected: AtomicBool,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            lines_total: AtomicU64::new(0),
            lines_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
            events_by_kind: Default::default(),
            unknown_total: AtomicU64::new(0),
            setup_total: AtomicU64::new(0),
            malformed_total: AtomicU64::new(0),
            occupancies_total: AtomicU64::new(0),
            alarm_occupancies_total: AtomicU64::new(0),
            gamma_alarm_occupancies_total: AtomicU64::new(0),
            neutron_alarm_occupancies_total: AtomicU64::new(0),
            idle_closes_total: AtomicU64::new(0),
            stream_failures_total: AtomicU64::new(0),
            reconnects_total: AtomicU64::new(0),
            publish_dropped_total: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one processed line and its decode latency
    #[inline]
    pub fn record_line_processed(&self, latency_us: u64) {
        self.lines_total.fetch_add(1, Ordering::Relaxed);
        self.lines_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event(&self, kind: EventKind) {
        self.events_by_kind[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_code(&self) {
        self.unknown_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_setup_code(&self) {
        self.setup_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_occupancy(&self, gamma_alarm: bool, neutron_alarm: bool) {
        self.occupancies_total.fetch_add(1, Ordering::Relaxed);
        if gamma_alarm || neutron_alarm {
            self.alarm_occupancies_total.fetch_add(1, Ordering::Relaxed);
        }
        if gamma_alarm {
            self.gamma_alarm_occupancies_total.fetch_add(1, Ordering::Relaxed);
        }
        if neutron_alarm {
            self.neutron_alarm_occupancies_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_idle_close(&self) {
        self.idle_closes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_failure(&self) {
        self.stream_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_dropped(&self) {
        self.publish_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn events_of(&self, kind: EventKind) -> u64 {
        self.events_by_kind[kind.index()].load(Ordering::Relaxed)
    }

    pub fn malformed_total(&self) -> u64 {
        self.malformed_total.load(Ordering::Relaxed)
    }

    pub fn unknown_total(&self) -> u64 {
        self.unknown_total.load(Ordering::Relaxed)
    }

    pub fn publish_dropped_total(&self) -> u64 {
        self.publish_dropped_total.load(Ordering::Relaxed)
    }

    /// Snapshot all counters and reset the per-interval ones
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Snapshot all counters without starting a new interval. Used by the
    /// scrape endpoint so scrapes do not steal the periodic report's data.
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last);
            if reset {
                *last = now;
            }
            elapsed
        };

        let (lines, latency_sum, latency_max, lat_buckets) = if reset {
            (
                self.lines_since_report.swap(0, Ordering::Relaxed),
                self.latency_sum_us.swap(0, Ordering::Relaxed),
                self.latency_max_us.swap(0, Ordering::Relaxed),
                swap_buckets(&self.latency_buckets),
            )
        } else {
            (
                self.lines_since_report.load(Ordering::Relaxed),
                self.latency_sum_us.load(Ordering::Relaxed),
                self.latency_max_us.load(Ordering::Relaxed),
                load_buckets(&self.latency_buckets),
            )
        };

        let secs = elapsed.as_secs_f64();
        let lines_per_sec = if secs > 0.0 { lines as f64 / secs } else { 0.0 };
        let avg_latency_us = if lines > 0 { latency_sum / lines } else { 0 };

        let mut events_by_kind = [0u64; NUM_KINDS];
        for (i, counter) in self.events_by_kind.iter().enumerate() {
            events_by_kind[i] = counter.load(Ordering::Relaxed);
        }

        MetricsSummary {
            connected: self.is_connected(),
            lines_total: self.lines_total(),
            lines_per_sec,
            avg_latency_us,
            max_latency_us: latency_max,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            events_by_kind,
            unknown_total: self.unknown_total(),
            setup_total: self.setup_total.load(Ordering::Relaxed),
            malformed_total: self.malformed_total(),
            occupancies_total: self.occupancies_total.load(Ordering::Relaxed),
            alarm_occupancies_total: self.alarm_occupancies_total.load(Ordering::Relaxed),
            gamma_alarm_occupancies_total: self
                .gamma_alarm_occupancies_total
                .load(Ordering::Relaxed),
            neutron_alarm_occupancies_total: self
                .neutron_alarm_occupancies_total
                .load(Ordering::Relaxed),
            idle_closes_total: self.idle_closes_total.load(Ordering::Relaxed),
            stream_failures_total: self.stream_failures_total.load(Ordering::Relaxed),
            reconnects_total: self.reconnects_total.load(Ordering::Relaxed),
            publish_dropped_total: self.publish_dropped_total(),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub connected: bool,
    pub lines_total: u64,
    pub lines_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    /// Indexed by `EventKind::index`
    pub events_by_kind: [u64; NUM_KINDS],
    pub unknown_total: u64,
    pub setup_total: u64,
    pub malformed_total: u64,
    pub occupancies_total: u64,
    pub alarm_occupancies_total: u64,
    pub gamma_alarm_occupancies_total: u64,
    pub neutron_alarm_occupancies_total: u64,
    pub idle_closes_total: u64,
    pub stream_failures_total: u64,
    pub reconnects_total: u64,
    pub publish_dropped_total: u64,
}

impl MetricsSummary {
    pub fn events_total(&self) -> u64 {
        self.events_by_kind.iter().sum()
    }

    pub fn events_of(&self, kind: EventKind) -> u64 {
        self.events_by_kind[kind.index()]
    }

    pub fn log(&self) {
        info!(
            connected = %self.connected,
            lines_total = %self.lines_total,
            lines_per_sec = format!("{:.1}", self.lines_per_sec),
            events_total = %self.events_total(),
            occupancies = %self.occupancies_total,
            alarm_occupancies = %self.alarm_occupancies_total,
            malformed = %self.malformed_total,
            unknown = %self.unknown_total,
            stream_failures = %self.stream_failures_total,
            publish_dropped = %self.publish_dropped_total,
            p99_us = %self.lat_p99_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.lines_total(), 0);
        assert!(!metrics.is_connected());
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(100_000), 10);
    }

    #[test]
    fn test_report_resets_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_line_processed(150);
        metrics.record_line_processed(250);

        let first = metrics.report();
        assert_eq!(first.lines_total, 2);
        assert_eq!(first.avg_latency_us, 200);
        assert_eq!(first.max_latency_us, 250);
        assert_eq!(first.lat_buckets[1], 1);
        assert_eq!(first.lat_buckets[2], 1);

        let second = metrics.report();
        assert_eq!(second.lines_total, 2);
        assert_eq!(second.avg_latency_us, 0);
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 0);
    }

    #[test]
    fn test_snapshot_keeps_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_line_processed(150);

        assert_eq!(metrics.snapshot().lat_buckets[1], 1);
        assert_eq!(metrics.snapshot().lat_buckets[1], 1);
        assert_eq!(metrics.report().lat_buckets[1], 1);
        assert_eq!(metrics.snapshot().lat_buckets[1], 0);
    }

    #[test]
    fn test_record_occupancy_flags() {
        let metrics = Metrics::new();
        metrics.record_occupancy(false, false);
        metrics.record_occupancy(true, false);
        metrics.record_occupancy(true, true);

        let summary = metrics.report();
        assert_eq!(summary.occupancies_total, 3);
        assert_eq!(summary.alarm_occupancies_total, 2);
        assert_eq!(summary.gamma_alarm_occupancies_total, 2);
        assert_eq!(summary.neutron_alarm_occupancies_total, 1);
    }

    #[test]
    fn test_events_by_kind() {
        let metrics = Metrics::new();
        metrics.record_event(EventKind::Gamma);
        metrics.record_event(EventKind::Gamma);
        metrics.record_event(EventKind::Speed);

        assert_eq!(metrics.events_of(EventKind::Gamma), 2);
        let summary = metrics.report();
        assert_eq!(summary.events_total(), 3);
        assert_eq!(summary.events_of(EventKind::Speed), 1);
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.99), 0);
    }
}
