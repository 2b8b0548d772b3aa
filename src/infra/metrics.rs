//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must not be used for coordination or logic decisions.

use crate::domain::types::{TransitionKind, ZoneKind};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Evaluation latency bucket bounds (microseconds); an overflow bucket follows
const BUCKET_BOUNDS: [u64; BOUND_COUNT] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

/// Nearest-hazard distance bucket bounds (meters); an overflow bucket follows
const HAZARD_DIST_BOUNDS: [u64; BOUND_COUNT] =
    [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];

const BOUND_COUNT: usize = 10;
const NUM_BUCKETS: usize = BOUND_COUNT + 1;

/// Fixed-bound histogram over atomics
struct Histogram {
    bounds: &'static [u64; BOUND_COUNT],
    buckets: [AtomicU64; NUM_BUCKETS],
    sum: AtomicU64,
}

impl Histogram {
    fn new(bounds: &'static [u64; BOUND_COUNT]) -> Self {
        Self { bounds, buckets: std::array::from_fn(|_| AtomicU64::new(0)), sum: AtomicU64::new(0) }
    }

    /// Bucket for a value: first bound >= value, else the overflow bucket
    #[inline]
    fn index(&self, value: u64) -> usize {
        self.bounds.partition_point(|&bound| bound < value)
    }

    #[inline]
    fn observe(&self, value: u64) {
        self.buckets[self.index(value)].fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
    }

    /// Bucket counts and sum, optionally zeroing them
    fn read(&self, reset: bool) -> ([u64; NUM_BUCKETS], u64) {
        let take = |a: &AtomicU64| {
            if reset {
                a.swap(0, Ordering::Relaxed)
            } else {
                a.load(Ordering::Relaxed)
            }
        };
        (std::array::from_fn(|i| take(&self.buckets[i])), take(&self.sum))
    }

    /// Upper bound of the bucket holding the given percentile; the overflow
    /// bucket reports twice the last bound
    fn percentile(&self, counts: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0;
        }
        let target = (total as f64 * percentile) as u64;
        let overflow = self.bounds[BOUND_COUNT - 1] * 2;

        let mut cumulative = 0u64;
        for (i, &count) in counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.bounds.get(i).copied().unwrap_or(overflow);
            }
        }
        overflow
    }
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total positions evaluated (monotonic)
    positions_total: AtomicU64,
    /// Positions since last report (reset on report)
    positions_since_report: AtomicU64,
    /// Max evaluation latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Evaluation latency histogram and sum (reset on report)
    latency: Histogram,
    /// Inputs rejected as invalid (monotonic)
    invalid_inputs_total: AtomicU64,
    hazard_entries_total: AtomicU64,
    hazard_exits_total: AtomicU64,
    destination_arrivals_total: AtomicU64,
    destination_departures_total: AtomicU64,
    /// Safety status changes published (monotonic)
    status_changes_total: AtomicU64,
    /// Panic alerts raised (monotonic)
    panic_alerts_total: AtomicU64,
    /// Notifications sent to the sinks (monotonic)
    notifications_total: AtomicU64,
    /// Last-seen location updates forwarded (monotonic)
    locations_forwarded_total: AtomicU64,
    /// Nearest hazard distance histogram (meters, cumulative)
    hazard_distance: Histogram,
    /// MQTT messages received (monotonic)
    mqtt_messages_total: AtomicU64,
    /// MQTT messages that failed to parse (monotonic)
    mqtt_messages_invalid: AtomicU64,
    /// MQTT events dropped due to channel full (monotonic)
    mqtt_events_dropped: AtomicU64,
    /// Egress messages dropped due to channel full (monotonic)
    egress_dropped: AtomicU64,
    /// Successful hazard feed refreshes (monotonic)
    hazard_feed_refreshes: AtomicU64,
    /// Failed hazard feed refreshes (monotonic)
    hazard_feed_failures: AtomicU64,
    /// Users with carried state (gauge)
    active_users: AtomicU64,
    /// Users whose last verdict was unsafe (gauge)
    unsafe_users: AtomicU64,
    /// Zones in the current hazard snapshot (gauge)
    hazard_zones: AtomicU64,
    /// Current event queue depth (updated by sampler)
    event_queue_depth: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            positions_total: AtomicU64::new(0),
            positions_since_report: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency: Histogram::new(&BUCKET_BOUNDS),
            invalid_inputs_total: AtomicU64::new(0),
            hazard_entries_total: AtomicU64::new(0),
            hazard_exits_total: AtomicU64::new(0),
            destination_arrivals_total: AtomicU64::new(0),
            destination_departures_total: AtomicU64::new(0),
            status_changes_total: AtomicU64::new(0),
            panic_alerts_total: AtomicU64::new(0),
            notifications_total: AtomicU64::new(0),
            locations_forwarded_total: AtomicU64::new(0),
            hazard_distance: Histogram::new(&HAZARD_DIST_BOUNDS),
            mqtt_messages_total: AtomicU64::new(0),
            mqtt_messages_invalid: AtomicU64::new(0),
            mqtt_events_dropped: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            hazard_feed_refreshes: AtomicU64::new(0),
            hazard_feed_failures: AtomicU64::new(0),
            active_users: AtomicU64::new(0),
            unsafe_users: AtomicU64::new(0),
            hazard_zones: AtomicU64::new(0),
            event_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a successful position evaluation and its latency (lock-free)
    #[inline]
    pub fn record_position_evaluated(&self, latency_us: u64) {
        self.positions_total.fetch_add(1, Ordering::Relaxed);
        self.positions_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_max_us.fetch_max(latency_us, Ordering::Relaxed);
        self.latency.observe(latency_us);
    }

    #[inline]
    pub fn positions_total(&self) -> u64 {
        self.positions_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_invalid_input(&self) {
        self.invalid_inputs_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_inputs_total(&self) -> u64 {
        self.invalid_inputs_total.load(Ordering::Relaxed)
    }

    /// Count one membership transition
    #[inline]
    pub fn record_transition(&self, zone: ZoneKind, kind: TransitionKind) {
        let counter = match (zone, kind) {
            (ZoneKind::Hazard, TransitionKind::Entered) => &self.hazard_entries_total,
            (ZoneKind::Hazard, TransitionKind::Exited) => &self.hazard_exits_total,
            (ZoneKind::Destination, TransitionKind::Entered) => &self.destination_arrivals_total,
            (ZoneKind::Destination, TransitionKind::Exited) => &self.destination_departures_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hazard_entries_total(&self) -> u64 {
        self.hazard_entries_total.load(Ordering::Relaxed)
    }

    pub fn hazard_exits_total(&self) -> u64 {
        self.hazard_exits_total.load(Ordering::Relaxed)
    }

    pub fn destination_arrivals_total(&self) -> u64 {
        self.destination_arrivals_total.load(Ordering::Relaxed)
    }

    pub fn destination_departures_total(&self) -> u64 {
        self.destination_departures_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_status_change(&self) {
        self.status_changes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_changes_total(&self) -> u64 {
        self.status_changes_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_panic_alert(&self) {
        self.panic_alerts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn panic_alerts_total(&self) -> u64 {
        self.panic_alerts_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_notification(&self) {
        self.notifications_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notifications_total(&self) -> u64 {
        self.notifications_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_location_forwarded(&self) {
        self.locations_forwarded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn locations_forwarded_total(&self) -> u64 {
        self.locations_forwarded_total.load(Ordering::Relaxed)
    }

    /// Record distance to the closest hazard zone center (meters)
    #[inline]
    pub fn record_hazard_distance(&self, dist_m: f64) {
        let dist = if dist_m.is_finite() && dist_m > 0.0 { dist_m as u64 } else { 0 };
        self.hazard_distance.observe(dist);
    }

    #[inline]
    pub fn record_mqtt_message(&self) {
        self.mqtt_messages_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_mqtt_message_invalid(&self) {
        self.mqtt_messages_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_messages_invalid(&self) -> u64 {
        self.mqtt_messages_invalid.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_mqtt_event_dropped(&self) {
        self.mqtt_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_events_dropped(&self) -> u64 {
        self.mqtt_events_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn egress_dropped(&self) -> u64 {
        self.egress_dropped.load(Ordering::Relaxed)
    }

    pub fn record_hazard_feed_refresh(&self, ok: bool) {
        if ok {
            self.hazard_feed_refreshes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hazard_feed_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn hazard_feed_failures(&self) -> u64 {
        self.hazard_feed_failures.load(Ordering::Relaxed)
    }

    /// Update user gauges (called from the monitor tick)
    pub fn set_user_counts(&self, active: u64, unsafe_users: u64) {
        self.active_users.store(active, Ordering::Relaxed);
        self.unsafe_users.store(unsafe_users, Ordering::Relaxed);
    }

    pub fn active_users(&self) -> u64 {
        self.active_users.load(Ordering::Relaxed)
    }

    pub fn unsafe_users(&self) -> u64 {
        self.unsafe_users.load(Ordering::Relaxed)
    }

    pub fn set_hazard_zones(&self, count: u64) {
        self.hazard_zones.store(count, Ordering::Relaxed);
    }

    pub fn hazard_zones(&self) -> u64 {
        self.hazard_zones.load(Ordering::Relaxed)
    }

    pub fn set_event_queue_depth(&self, depth: u64) {
        self.event_queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn event_queue_depth(&self) -> u64 {
        self.event_queue_depth.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Same summary as `report` without resetting anything (for scrapes)
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let (positions_count, max_latency) = if reset {
            (
                self.positions_since_report.swap(0, Ordering::Relaxed),
                self.latency_max_us.swap(0, Ordering::Relaxed),
            )
        } else {
            (
                self.positions_since_report.load(Ordering::Relaxed),
                self.latency_max_us.load(Ordering::Relaxed),
            )
        };
        let (lat_buckets, latency_sum) = self.latency.read(reset);
        let (hazard_distance_buckets, hazard_distance_sum_m) = self.hazard_distance.read(false);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            if reset {
                *last = Instant::now();
            }
            elapsed
        };

        let positions_per_sec = if elapsed.as_secs_f64() > 0.0 {
            positions_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if positions_count > 0 { latency_sum / positions_count } else { 0 };

        MetricsSummary {
            positions_total: self.positions_total.load(Ordering::Relaxed),
            positions_per_sec,
            avg_eval_latency_us: avg_latency,
            max_eval_latency_us: max_latency,
            eval_latency_sum_us: latency_sum,
            lat_p50_us: self.latency.percentile(&lat_buckets, 0.50),
            lat_p95_us: self.latency.percentile(&lat_buckets, 0.95),
            lat_p99_us: self.latency.percentile(&lat_buckets, 0.99),
            lat_buckets,
            invalid_inputs_total: self.invalid_inputs_total.load(Ordering::Relaxed),
            hazard_entries_total: self.hazard_entries_total.load(Ordering::Relaxed),
            hazard_exits_total: self.hazard_exits_total.load(Ordering::Relaxed),
            destination_arrivals_total: self.destination_arrivals_total.load(Ordering::Relaxed),
            destination_departures_total: self
                .destination_departures_total
                .load(Ordering::Relaxed),
            status_changes_total: self.status_changes_total.load(Ordering::Relaxed),
            panic_alerts_total: self.panic_alerts_total.load(Ordering::Relaxed),
            notifications_total: self.notifications_total.load(Ordering::Relaxed),
            locations_forwarded_total: self.locations_forwarded_total.load(Ordering::Relaxed),
            hazard_distance_buckets,
            hazard_distance_sum_m,
            mqtt_messages_total: self.mqtt_messages_total.load(Ordering::Relaxed),
            mqtt_messages_invalid: self.mqtt_messages_invalid.load(Ordering::Relaxed),
            mqtt_events_dropped: self.mqtt_events_dropped.load(Ordering::Relaxed),
            egress_dropped: self.egress_dropped.load(Ordering::Relaxed),
            hazard_feed_refreshes: self.hazard_feed_refreshes.load(Ordering::Relaxed),
            hazard_feed_failures: self.hazard_feed_failures.load(Ordering::Relaxed),
            active_users: self.active_users.load(Ordering::Relaxed),
            unsafe_users: self.unsafe_users.load(Ordering::Relaxed),
            hazard_zones: self.hazard_zones.load(Ordering::Relaxed),
            event_queue_depth: self.event_queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; BOUND_COUNT] = BUCKET_BOUNDS;
pub const METRICS_HAZARD_DIST_BOUNDS: [u64; BOUND_COUNT] = HAZARD_DIST_BOUNDS;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub positions_total: u64,
    pub positions_per_sec: f64,
    pub avg_eval_latency_us: u64,
    pub max_eval_latency_us: u64,
    /// Latency sum over the same window as `lat_buckets`
    pub eval_latency_sum_us: u64,
    /// Evaluation latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub invalid_inputs_total: u64,
    pub hazard_entries_total: u64,
    pub hazard_exits_total: u64,
    pub destination_arrivals_total: u64,
    pub destination_departures_total: u64,
    pub status_changes_total: u64,
    pub panic_alerts_total: u64,
    pub notifications_total: u64,
    pub locations_forwarded_total: u64,
    /// Nearest hazard distance histogram (m)
    /// Bounds: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600 m
    pub hazard_distance_buckets: [u64; NUM_BUCKETS],
    pub hazard_distance_sum_m: u64,
    pub mqtt_messages_total: u64,
    pub mqtt_messages_invalid: u64,
    pub mqtt_events_dropped: u64,
    pub egress_dropped: u64,
    pub hazard_feed_refreshes: u64,
    pub hazard_feed_failures: u64,
    pub active_users: u64,
    pub unsafe_users: u64,
    pub hazard_zones: u64,
    pub event_queue_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            positions_total = %self.positions_total,
            positions_per_sec = format!("{:.1}", self.positions_per_sec),
            avg_latency_us = %self.avg_eval_latency_us,
            max_latency_us = %self.max_eval_latency_us,
            p99_us = %self.lat_p99_us,
            active_users = %self.active_users,
            unsafe_users = %self.unsafe_users,
            hazard_zones = %self.hazard_zones,
            hazard_entries = %self.hazard_entries_total,
            panics = %self.panic_alerts_total,
            invalid = %self.invalid_inputs_total,
            mqtt_dropped = %self.mqtt_events_dropped,
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
        assert_eq!(metrics.positions_total(), 0);
        assert_eq!(metrics.invalid_inputs_total(), 0);
    }

    #[test]
    fn test_record_position() {
        let metrics = Metrics::new();

        metrics.record_position_evaluated(100);
        assert_eq!(metrics.positions_total(), 1);
        assert_eq!(metrics.latency.sum.load(Ordering::Relaxed), 100);

        metrics.record_position_evaluated(200);
        assert_eq!(metrics.positions_total(), 2);
        assert_eq!(metrics.latency.sum.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_record_transition_counters() {
        let metrics = Metrics::new();
        metrics.record_transition(ZoneKind::Hazard, TransitionKind::Entered);
        metrics.record_transition(ZoneKind::Hazard, TransitionKind::Entered);
        metrics.record_transition(ZoneKind::Hazard, TransitionKind::Exited);
        metrics.record_transition(ZoneKind::Destination, TransitionKind::Entered);

        assert_eq!(metrics.hazard_entries_total(), 2);
        assert_eq!(metrics.hazard_exits_total(), 1);
        assert_eq!(metrics.destination_arrivals_total(), 1);
        assert_eq!(metrics.destination_departures_total(), 0);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_position_evaluated(100);
        metrics.record_position_evaluated(200);
        metrics.record_position_evaluated(300);
        metrics.record_panic_alert();
        metrics.set_user_counts(5, 2);

        let summary = metrics.report();

        assert_eq!(summary.positions_total, 3);
        assert_eq!(summary.avg_eval_latency_us, 200);
        assert_eq!(summary.max_eval_latency_us, 300);
        assert_eq!(summary.active_users, 5);
        assert_eq!(summary.unsafe_users, 2);
        assert_eq!(summary.panic_alerts_total, 1);

        // Periodic counters should be reset
        assert_eq!(metrics.positions_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency.sum.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_position_evaluated(100);

        let first = metrics.snapshot();
        let second = metrics.snapshot();
        assert_eq!(first.avg_eval_latency_us, 100);
        assert_eq!(second.lat_buckets[0], 1);

        let reported = metrics.report();
        assert_eq!(reported.max_eval_latency_us, 100);
        assert_eq!(metrics.snapshot().max_eval_latency_us, 0);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report();

        assert_eq!(summary.positions_total, 0);
        assert_eq!(summary.avg_eval_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_position_evaluated(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.positions_total(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        let latency = Histogram::new(&BUCKET_BOUNDS);
        assert_eq!(latency.index(0), 0);
        assert_eq!(latency.index(100), 0);
        assert_eq!(latency.index(101), 1);
        assert_eq!(latency.index(51200), 9);
        assert_eq!(latency.index(51201), 10);
    }

    #[test]
    fn test_overflow_percentile() {
        let metrics = Metrics::new();
        metrics.record_position_evaluated(1_000_000);
        assert_eq!(metrics.report().lat_p99_us, 102_400);
    }

    #[test]
    fn test_hazard_distance_buckets() {
        let metrics = Metrics::new();
        metrics.record_hazard_distance(10.0);
        metrics.record_hazard_distance(150.0);
        metrics.record_hazard_distance(1_000_000.0);
        metrics.record_hazard_distance(f64::NAN);

        // Cumulative: not reset by report
        let _ = metrics.report();
        let summary = metrics.report();
        assert_eq!(summary.hazard_distance_buckets[0], 2);
        assert_eq!(summary.hazard_distance_buckets[2], 1);
        assert_eq!(summary.hazard_distance_buckets[10], 1);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_position_evaluated(150);
        }

        let summary = metrics.report();
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
