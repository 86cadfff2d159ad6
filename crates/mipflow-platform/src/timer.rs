//! High-Resolution Timers
//!
//! Timing utilities for profiling the transfer worker and eviction sweeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Wall-clock timer for a run or a phase
#[derive(Debug)]
pub struct HighResTimer {
    start: Instant,
}

impl HighResTimer {
    /// Create and start a new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time since timer start
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_millis(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for HighResTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped timer that emits its duration as a tracing event on drop
///
/// Events use the `timing` target.
pub struct ScopedTimer<'a> {
    name: &'a str,
    start: Instant,
}

impl<'a> ScopedTimer<'a> {
    pub fn traced(name: &'a str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Get elapsed time so far
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        tracing::debug!(
            target: "timing",
            name = self.name,
            duration_us = self.start.elapsed().as_micros() as u64,
            "Timer completed"
        );
    }
}

/// Performance counter for tracking operation counts and timing
#[derive(Debug)]
pub struct PerfCounter {
    name: String,
    count: AtomicU64,
    total_nanos: AtomicU64,
}

impl PerfCounter {
    /// Create a new performance counter
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
        }
    }

    /// Record a timed operation
    pub fn record(&self, duration: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Get the counter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the operation count
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn total_nanos(&self) -> u64 {
        self.total_nanos.load(Ordering::Relaxed)
    }

    /// Get average time per operation in nanoseconds
    pub fn average_nanos(&self) -> f64 {
        let count = self.count();
        if count > 0 {
            self.total_nanos() as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Get average time per operation in milliseconds
    pub fn average_millis(&self) -> f64 {
        self.average_nanos() / 1_000_000.0
    }

    /// Time an operation and record it
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.record(start.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_res_timer() {
        let timer = HighResTimer::new();
        std::thread::sleep(Duration::from_millis(10));

        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.elapsed_millis() >= 10.0);
    }

    #[test]
    fn test_perf_counter() {
        let counter = PerfCounter::new("sweep");
        assert_eq!(counter.average_millis(), 0.0);

        for _ in 0..10 {
            counter.time(|| {
                std::thread::sleep(Duration::from_micros(100));
            });
        }

        assert_eq!(counter.name(), "sweep");
        assert_eq!(counter.count(), 10);
        assert!(counter.average_nanos() >= 100_000.0);
        assert!(counter.total_nanos() >= 1_000_000);
    }

    #[test]
    fn test_scoped_timer() {
        let timer = ScopedTimer::traced("iteration");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() >= Duration::from_millis(5));
    }
}
