//! Counters and latency histograms collected while generating load.
//!
//! A single [`MetricsRegistry`] is created per run and shared by reference with every operation.
//! All updates are lock-free atomics, except for the percentile sketch which is behind a mutex
//! held for a single insert.
//!
//! Every update is also forwarded through `merni`. Forwarding is a no-op unless a metrics sink
//! was initialized, see [`crate::observability::init_metrics`].

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sketches_ddsketch::DDSketch;

use crate::executor::OperationKind;

/// Upper bounds in seconds of the write latency buckets.
///
/// Writes carry a full payload, so the buckets start at 10ms and reach up to one second.
pub const WRITE_LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.02, 0.03, 0.04, 0.05, 0.06, 0.07, 0.08, 0.09, 0.1, 0.11, 0.12, 0.14, 0.16, 0.18, 0.2,
    0.25, 0.3, 0.4, 0.5, 0.75, 1.0,
];

/// Upper bounds in seconds of the read latency buckets.
pub const READ_LATENCY_BUCKETS: &[f64] = &[
    0.006, 0.01, 0.012, 0.014, 0.016, 0.018, 0.02, 0.024, 0.028, 0.035, 0.05, 0.075, 0.1, 0.125,
    0.15, 0.2, 0.25, 0.3, 0.4, 0.5,
];

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increments the counter by one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Increments the counter by `n`.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A latency histogram with fixed bucket boundaries.
///
/// Besides the bucket counts, observations are fed into a [`DDSketch`] to answer percentile
/// queries for the final report.
pub struct Histogram {
    bounds: &'static [f64],
    /// One slot per bound, plus a trailing overflow slot.
    buckets: Box<[AtomicU64]>,
    count: AtomicU64,
    sum_micros: AtomicU64,
    sketch: Mutex<DDSketch>,
}

impl Histogram {
    /// Creates an empty histogram with the given bucket upper bounds in seconds.
    ///
    /// The bounds must be sorted in ascending order.
    pub fn new(bounds: &'static [f64]) -> Self {
        debug_assert!(bounds.windows(2).all(|w| w[0] < w[1]));

        Self {
            bounds,
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            sketch: Mutex::new(DDSketch::default()),
        }
    }

    /// Records one observation.
    pub fn observe(&self, duration: Duration) {
        let seconds = duration.as_secs_f64();
        let index = self.bounds.partition_point(|&bound| bound < seconds);

        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sketch.lock().unwrap().add(seconds);
    }

    /// Returns the number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns the sum of all observations.
    pub fn sum(&self) -> Duration {
        Duration::from_micros(self.sum_micros.load(Ordering::Relaxed))
    }

    /// Returns `(upper bound in seconds, count)` for every bucket.
    ///
    /// Counts are per bucket, not cumulative. The last entry has an infinite upper bound.
    pub fn buckets(&self) -> Vec<(f64, u64)> {
        self.bounds
            .iter()
            .copied()
            .chain(std::iter::once(f64::INFINITY))
            .zip(self.buckets.iter())
            .map(|(bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }

    /// Returns the approximate `q`-quantile of all observations.
    pub fn quantile(&self, q: f64) -> Option<Duration> {
        let sketch = self.sketch.lock().unwrap();
        let value = sketch.quantile(q).ok().flatten()?;
        Some(Duration::from_secs_f64(value.max(0.0)))
    }

    /// Summarizes the histogram for reporting.
    pub fn summary(&self) -> LatencySummary {
        let count = self.count();
        LatencySummary {
            count,
            avg: (count > 0)
                .then(|| Duration::from_secs_f64(self.sum().as_secs_f64() / count as f64)),
            p50: self.quantile(0.5),
            p90: self.quantile(0.9),
            p99: self.quantile(0.99),
        }
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("count", &self.count())
            .field("sum", &self.sum())
            .field("buckets", &self.buckets())
            .finish_non_exhaustive()
    }
}

/// Aggregated latency figures of a [`Histogram`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LatencySummary {
    /// Number of observations.
    pub count: u64,
    /// Mean latency.
    pub avg: Option<Duration>,
    /// Median latency.
    pub p50: Option<Duration>,
    /// 90th percentile latency.
    pub p90: Option<Duration>,
    /// 99th percentile latency.
    pub p99: Option<Duration>,
}

/// Metrics of the write path.
#[derive(Debug)]
pub struct WriteMetrics {
    /// Every write that was issued.
    pub attempts: Counter,
    /// Writes that the store acknowledged.
    pub successes: Counter,
    /// Writes that failed.
    pub errors: Counter,
    /// Bytes acknowledged by the store.
    pub bytes: Counter,
    /// Latency of successful writes.
    pub latency: Histogram,
}

/// Metrics of the read path.
#[derive(Debug)]
pub struct ReadMetrics {
    /// Every read that was issued.
    pub attempts: Counter,
    /// Reads that returned the full object.
    pub hits: Counter,
    /// Reads of objects that do not exist.
    pub misses: Counter,
    /// Reads that failed for any other reason.
    pub errors: Counter,
    /// Bytes received from the store.
    pub bytes: Counter,
    /// Latency of successful reads, including the full transfer.
    pub latency: Histogram,
}

/// Metrics of corpus population.
#[derive(Debug, Default)]
pub struct WarmupMetrics {
    /// Corpus objects that were written.
    pub writes: Counter,
    /// Corpus objects that could not be written.
    pub failures: Counter,
}

/// The registry of all metrics of one run.
#[derive(Debug)]
pub struct MetricsRegistry {
    started: Instant,
    /// Write path metrics.
    pub write: WriteMetrics,
    /// Read path metrics.
    pub read: ReadMetrics,
    /// Warm-up metrics.
    pub warmup: WarmupMetrics,
    /// Write ticks skipped because too many operations were in flight.
    pub dropped_write_ticks: Counter,
    /// Read ticks skipped because too many operations were in flight or no key was available.
    pub dropped_read_ticks: Counter,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            write: WriteMetrics {
                attempts: Counter::default(),
                successes: Counter::default(),
                errors: Counter::default(),
                bytes: Counter::default(),
                latency: Histogram::new(WRITE_LATENCY_BUCKETS),
            },
            read: ReadMetrics {
                attempts: Counter::default(),
                hits: Counter::default(),
                misses: Counter::default(),
                errors: Counter::default(),
                bytes: Counter::default(),
                latency: Histogram::new(READ_LATENCY_BUCKETS),
            },
            warmup: WarmupMetrics::default(),
            dropped_write_ticks: Counter::default(),
            dropped_read_ticks: Counter::default(),
        }
    }

    /// Time since the registry was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records that an operation was issued.
    pub fn record_attempt(&self, kind: OperationKind) {
        match kind {
            OperationKind::Write => self.write.attempts.inc(),
            OperationKind::Read => self.read.attempts.inc(),
        }
        merni::counter!("operation.attempt": 1, "kind" => kind.as_str());
    }

    /// Records a successful operation and its latency.
    pub fn record_success(&self, kind: OperationKind, bytes: u64, duration: Duration) {
        match kind {
            OperationKind::Write => {
                self.write.successes.inc();
                self.write.bytes.add(bytes);
                self.write.latency.observe(duration);
            }
            OperationKind::Read => {
                self.read.hits.inc();
                self.read.bytes.add(bytes);
                self.read.latency.observe(duration);
            }
        }
        merni::counter!("operation.success": 1, "kind" => kind.as_str());
        merni::distribution!("operation.latency"@s: duration, "kind" => kind.as_str());
        merni::distribution!("operation.size"@b: bytes, "kind" => kind.as_str());
    }

    /// Records a read of a key that does not exist.
    pub fn record_miss(&self) {
        self.read.misses.inc();
        merni::counter!("operation.miss": 1, "kind" => OperationKind::Read.as_str());
    }

    /// Records a failed operation.
    pub fn record_error(&self, kind: OperationKind) {
        match kind {
            OperationKind::Write => self.write.errors.inc(),
            OperationKind::Read => self.read.errors.inc(),
        }
        merni::counter!("operation.error": 1, "kind" => kind.as_str());
    }

    /// Records a tick that was skipped instead of dispatching an operation.
    pub fn record_dropped_tick(&self, kind: OperationKind) {
        match kind {
            OperationKind::Write => self.dropped_write_ticks.inc(),
            OperationKind::Read => self.dropped_read_ticks.inc(),
        }
        merni::counter!("ticks.dropped": 1, "kind" => kind.as_str());
    }

    /// Records the outcome of writing one corpus object.
    pub fn record_warmup(&self, success: bool) {
        if success {
            self.warmup.writes.inc();
            merni::counter!("warmup.write": 1);
        } else {
            self.warmup.failures.inc();
            merni::counter!("warmup.failure": 1);
        }
    }

    /// Takes a consistent-enough copy of all values for reporting.
    ///
    /// Values are read one by one while operations may still be running, so counters from
    /// different paths can be off by the operations completing during the snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elapsed: self.elapsed(),
            write_attempts: self.write.attempts.get(),
            write_successes: self.write.successes.get(),
            write_errors: self.write.errors.get(),
            bytes_written: self.write.bytes.get(),
            write_latency: self.write.latency.summary(),
            write_buckets: self.write.latency.buckets(),
            read_attempts: self.read.attempts.get(),
            read_hits: self.read.hits.get(),
            read_misses: self.read.misses.get(),
            read_errors: self.read.errors.get(),
            bytes_read: self.read.bytes.get(),
            read_latency: self.read.latency.summary(),
            read_buckets: self.read.latency.buckets(),
            warmup_writes: self.warmup.writes.get(),
            warmup_failures: self.warmup.failures.get(),
            dropped_write_ticks: self.dropped_write_ticks.get(),
            dropped_read_ticks: self.dropped_read_ticks.get(),
        }
    }
}

/// A point-in-time copy of a [`MetricsRegistry`].
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub elapsed: Duration,

    pub write_attempts: u64,
    pub write_successes: u64,
    pub write_errors: u64,
    pub bytes_written: u64,
    pub write_latency: LatencySummary,
    pub write_buckets: Vec<(f64, u64)>,

    pub read_attempts: u64,
    pub read_hits: u64,
    pub read_misses: u64,
    pub read_errors: u64,
    pub bytes_read: u64,
    pub read_latency: LatencySummary,
    pub read_buckets: Vec<(f64, u64)>,

    pub warmup_writes: u64,
    pub warmup_failures: u64,

    pub dropped_write_ticks: u64,
    pub dropped_read_ticks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_counts() {
        let counter = Counter::default();
        counter.inc();
        counter.add(41);
        assert_eq!(counter.get(), 42);
    }

    #[test]
    fn observations_land_in_buckets() {
        let histogram = Histogram::new(&[0.01, 0.1, 1.0]);

        histogram.observe(Duration::from_millis(5));
        histogram.observe(Duration::from_millis(10));
        histogram.observe(Duration::from_millis(50));
        histogram.observe(Duration::from_secs(2));

        let buckets = histogram.buckets();
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets[0], (0.01, 2));
        assert_eq!(buckets[1], (0.1, 1));
        assert_eq!(buckets[2], (1.0, 0));
        assert_eq!(buckets[3].1, 1);
        assert!(buckets[3].0.is_infinite());

        assert_eq!(histogram.count(), 4);
        assert_eq!(histogram.sum(), Duration::from_millis(2065));
    }

    #[test]
    fn quantiles_are_approximate() {
        let histogram = Histogram::new(READ_LATENCY_BUCKETS);
        for ms in 1..=100 {
            histogram.observe(Duration::from_millis(ms));
        }

        let p50 = histogram.quantile(0.5).unwrap().as_secs_f64();
        assert!((p50 - 0.05).abs() < 0.002, "p50 was {p50}");

        let summary = histogram.summary();
        assert_eq!(summary.count, 100);
        assert!(summary.avg.is_some());
        assert!(summary.p99.unwrap() >= summary.p90.unwrap());
    }

    #[test]
    fn empty_histogram_has_no_quantiles() {
        let histogram = Histogram::new(WRITE_LATENCY_BUCKETS);
        assert_eq!(histogram.quantile(0.5), None);
        assert_eq!(histogram.summary(), LatencySummary::default());
    }

    #[test]
    fn buckets_span_milliseconds_to_a_second() {
        for bounds in [WRITE_LATENCY_BUCKETS, READ_LATENCY_BUCKETS] {
            assert!(bounds[0] < 0.01 + f64::EPSILON);
            assert!(*bounds.last().unwrap() >= 0.5);
            assert!(bounds.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn latency_only_recorded_for_successes() {
        let registry = MetricsRegistry::new();

        registry.record_attempt(OperationKind::Read);
        registry.record_miss();
        registry.record_attempt(OperationKind::Read);
        registry.record_error(OperationKind::Read);
        registry.record_attempt(OperationKind::Read);
        registry.record_success(OperationKind::Read, 16, Duration::from_millis(3));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.read_attempts, 3);
        assert_eq!(snapshot.read_hits, 1);
        assert_eq!(snapshot.read_misses, 1);
        assert_eq!(snapshot.read_errors, 1);
        assert_eq!(snapshot.bytes_read, 16);
        assert_eq!(registry.read.latency.count(), 1);
        assert_eq!(registry.write.latency.count(), 0);
    }

    #[test]
    fn dropped_ticks_are_per_kind() {
        let registry = MetricsRegistry::new();
        registry.record_dropped_tick(OperationKind::Write);
        registry.record_dropped_tick(OperationKind::Read);
        registry.record_dropped_tick(OperationKind::Read);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.dropped_write_ticks, 1);
        assert_eq!(snapshot.dropped_read_ticks, 2);
    }
}
