use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window of latency measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size: window_size.max(1),
        }
    }

    /// Record a measurement in nanoseconds
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = self.measurements.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Per-stage counters, shared between the stage thread and observers
#[derive(Debug, Clone)]
pub struct StageMetrics {
    /// Payloads handed to an outbound connection
    produced: Arc<AtomicU64>,
    /// Inbound tasks acknowledged as successful
    succeeded: Arc<AtomicU64>,
    /// Inbound tasks acknowledged as failed
    failed: Arc<AtomicU64>,
    /// Extra attempts made by the retry policy
    retries: Arc<AtomicU64>,
    /// Inbound tasks accepted without emitting output
    skipped: Arc<AtomicU64>,
    latency_tracker: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            produced: Arc::new(AtomicU64::new(0)),
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            retries: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
            latency_tracker: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    pub fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acknowledged(&self, success: bool) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        self.latency_tracker.record(elapsed.as_nanos() as u64);
    }

    pub fn total_produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    pub fn total_succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn total_skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Acknowledged tasks per second since creation
    pub fn throughput_per_sec(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let total = self.total_succeeded() + self.total_failed();
        if elapsed == 0.0 {
            0.0
        } else {
            total as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            produced: self.total_produced(),
            succeeded: self.total_succeeded(),
            failed: self.total_failed(),
            retries: self.total_retries(),
            skipped: self.total_skipped(),
            throughput_per_sec: self.throughput_per_sec(),
            latency_p50_us: self.latency_tracker.p50_us(),
            latency_p99_us: self.latency_tracker.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a stage's metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub produced: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
    pub skipped: u64,
    pub throughput_per_sec: f64,
    pub latency_p50_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    pub fn format(&self) -> String {
        format!(
            "Produced: {}, Succeeded: {}, Failed: {}, Retries: {}, Skipped: {}, \
             Throughput: {:.2} task/s, Latency P50: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.produced,
            self.succeeded,
            self.failed,
            self.retries,
            self.skipped,
            self.throughput_per_sec,
            self.latency_p50_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_tracker() {
        let tracker = PercentileTracker::new(10);
        for i in 1..=10 {
            tracker.record(i * 1000);
        }
        assert_eq!(tracker.p50_us(), 5.0);
        assert_eq!(tracker.p99_us(), 10.0);
    }

    #[test]
    fn test_percentile_window_evicts_oldest() {
        let tracker = PercentileTracker::new(2);
        tracker.record(1);
        tracker.record(2);
        tracker.record(3);
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn test_stage_metrics_counts() {
        let metrics = StageMetrics::new();
        metrics.record_acknowledged(true);
        metrics.record_acknowledged(true);
        metrics.record_acknowledged(false);
        metrics.record_retry();
        metrics.record_produced();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.produced, 1);
        assert!(snapshot.format().contains("Failed: 1"));
    }

    #[test]
    fn test_metrics_clone_shares_counters() {
        let metrics = StageMetrics::new();
        let observer = metrics.clone();
        metrics.record_produced();
        assert_eq!(observer.total_produced(), 1);
    }
}
