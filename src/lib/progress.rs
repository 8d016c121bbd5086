//! Thread-safe progress tracking.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logs progress when an internal count crosses interval boundaries.
///
/// Safe to share across threads; counting is a single atomic add.
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Creates a tracker with the default interval of 100,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 100_000, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Sets the logging interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    /// Adds to the count, logging once per interval boundary crossed.
    pub fn log_if_needed(&self, additional: u64) {
        if additional == 0 {
            return;
        }
        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;
        for i in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!("{} {}", self.message, format_milestone(i * self.interval));
        }
    }

    /// Logs the final count if it did not land exactly on an interval.
    pub fn log_final(&self) {
        let count = self.count.load(Ordering::Relaxed);
        if count > 0 && !count.is_multiple_of(self.interval) {
            info!("{} {} (done)", self.message, format_milestone(count));
        }
    }

    /// Current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

fn format_milestone(n: u64) -> String {
    if n >= 1000 && n.is_multiple_of(1000) { format!("{}K", n / 1000) } else { n.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let tracker = ProgressTracker::new("Read").with_interval(10);
        tracker.log_if_needed(5);
        tracker.log_if_needed(7);
        assert_eq!(tracker.count(), 12);
        tracker.log_final();
    }

    #[test]
    fn test_crossing_multiple_intervals() {
        let tracker = ProgressTracker::new("Read").with_interval(10);
        tracker.log_if_needed(35);
        assert_eq!(tracker.count(), 35);
    }

    #[test]
    fn test_milestone_format() {
        assert_eq!(format_milestone(500), "500");
        assert_eq!(format_milestone(100_000), "100K");
        assert_eq!(format_milestone(1500), "1500");
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        let tracker = Arc::new(ProgressTracker::new("Read").with_interval(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.log_if_needed(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.count(), 800);
    }
}
