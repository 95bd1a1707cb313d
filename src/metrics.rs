// Session metrics module
//
// Lightweight counters for host launches and isolation results

use crate::models::TestOutcome;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Session metrics
///
/// Uses atomic operations so the isolator, the status renderer and `main`
/// can share one instance behind an `Arc` without locks.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of host launches
    pub launches: AtomicUsize,

    pub outcomes_passed: AtomicUsize,
    pub outcomes_crashed: AtomicUsize,
    pub outcomes_hung: AtomicUsize,

    /// Number of operator interrupts
    pub interrupts: AtomicUsize,

    /// Plugins confirmed passing
    pub plugins_passed: AtomicUsize,

    /// Plugins isolated as culprits
    pub plugins_failed: AtomicUsize,

    /// Total time spent inside host launches in milliseconds
    pub total_host_time_ms: AtomicU64,

    /// Status events that had no listener
    pub status_broadcast_errors: AtomicU64,

    start_time: Instant,
}

/// Point-in-time copy of [`Metrics`], written into the session summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub launches: usize,
    pub passed: usize,
    pub crashed: usize,
    pub hung: usize,
    pub interrupts: usize,
    pub plugins_passed: usize,
    pub plugins_failed: usize,
    pub host_time_secs: f64,
    pub uptime_secs: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            outcomes_passed: AtomicUsize::new(0),
            outcomes_crashed: AtomicUsize::new(0),
            outcomes_hung: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            plugins_passed: AtomicUsize::new(0),
            plugins_failed: AtomicUsize::new(0),
            total_host_time_ms: AtomicU64::new(0),
            status_broadcast_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one finished host launch
    pub fn record_launch(&self, outcome: TestOutcome, duration: Duration) {
        self.launches.fetch_add(1, Ordering::Relaxed);
        self.total_host_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);

        let counter = match outcome {
            TestOutcome::Passed => &self.outcomes_passed,
            TestOutcome::Crashed => &self.outcomes_crashed,
            TestOutcome::Hung => &self.outcomes_hung,
            TestOutcome::Interrupted => &self.interrupts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_plugins_passed(&self, count: usize) {
        self.plugins_passed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_plugin_failed(&self) {
        self.plugins_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_broadcast_error(&self) {
        self.status_broadcast_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average host run time per launch in milliseconds
    pub fn avg_launch_time_ms(&self) -> f64 {
        let total = self.total_host_time_ms.load(Ordering::Relaxed);
        let count = self.launches.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            launches: self.launches.load(Ordering::Relaxed),
            passed: self.outcomes_passed.load(Ordering::Relaxed),
            crashed: self.outcomes_crashed.load(Ordering::Relaxed),
            hung: self.outcomes_hung.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            plugins_passed: self.plugins_passed.load(Ordering::Relaxed),
            plugins_failed: self.plugins_failed.load(Ordering::Relaxed),
            host_time_secs: self.total_host_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            uptime_secs: self.uptime().as_secs_f64(),
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!("=== Session Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", s.uptime_secs);
        tracing::info!(
            "Launches: {} ({} passed, {} crashed, {} hung, {} interrupted)",
            s.launches,
            s.passed,
            s.crashed,
            s.hung,
            s.interrupts
        );
        tracing::info!(
            "Plugins: {} passed, {} isolated",
            s.plugins_passed,
            s.plugins_failed
        );
        tracing::info!(
            "Host time: {:.2}s (avg: {:.2}ms per launch)",
            s.host_time_secs,
            self.avg_launch_time_ms()
        );
        tracing::debug!(
            "Status broadcast errors: {}",
            self.status_broadcast_errors.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.launches.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.plugins_failed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_launch_per_outcome() {
        let metrics = Metrics::new();

        metrics.record_launch(TestOutcome::Passed, Duration::from_millis(100));
        metrics.record_launch(TestOutcome::Crashed, Duration::from_millis(200));
        metrics.record_launch(TestOutcome::Hung, Duration::ZERO);
        metrics.record_launch(TestOutcome::Interrupted, Duration::ZERO);

        let s = metrics.snapshot();
        assert_eq!(s.launches, 4);
        assert_eq!(s.passed, 1);
        assert_eq!(s.crashed, 1);
        assert_eq!(s.hung, 1);
        assert_eq!(s.interrupts, 1);
        assert_eq!(metrics.avg_launch_time_ms(), 75.0);
    }

    #[test]
    fn test_avg_launch_time_no_launches() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_launch_time_ms(), 0.0);
    }

    #[test]
    fn test_plugin_counters() {
        let metrics = Metrics::new();
        metrics.record_plugins_passed(3);
        metrics.record_plugin_failed();

        let s = metrics.snapshot();
        assert_eq!(s.plugins_passed, 3);
        assert_eq!(s.plugins_failed, 1);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }
}
