//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciliations grow along the Fibonacci
//! sequence in whole minutes: 1m, 1m, 2m, 3m, 5m, 8m, then capped at 10m.
//! Each instance keeps its own sequence, reset by the next successful pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Returns the current delay and advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.max_minutes);
        delay
    }

    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

#[derive(Debug, Clone, Default)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Per-instance backoff keyed by `namespace/name`
#[derive(Debug, Clone, Default)]
pub struct BackoffTracker {
    states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure and returns the delay before the next attempt
    pub fn record_failure(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_default();
        state.error_count += 1;
        state.backoff.next_backoff()
    }

    pub fn record_success(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.remove(key);
    }

    /// Consecutive failures since the last success
    pub fn error_count(&self, key: &str) -> u32 {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(key).map_or(0, |s| s.error_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let sequence: Vec<Duration> = (0..9).map(|_| backoff.next_backoff()).collect();
        assert_eq!(
            sequence,
            vec![
                minutes(1),
                minutes(1),
                minutes(2),
                minutes(3),
                minutes(5),
                minutes(8),
                minutes(10),
                minutes(10),
                minutes(10),
            ]
        );
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::default();
        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), minutes(2));

        backoff.reset();
        assert_eq!(backoff.next_backoff(), minutes(1));
        assert_eq!(backoff.next_backoff(), minutes(1));
    }

    #[test]
    fn test_tracker_is_per_instance() {
        let tracker = BackoffTracker::new();
        assert_eq!(tracker.record_failure("serving/a"), minutes(1));
        assert_eq!(tracker.record_failure("serving/a"), minutes(1));
        assert_eq!(tracker.record_failure("serving/a"), minutes(2));
        assert_eq!(tracker.record_failure("serving/b"), minutes(1));
        assert_eq!(tracker.error_count("serving/a"), 3);

        tracker.record_success("serving/a");
        assert_eq!(tracker.error_count("serving/a"), 0);
        assert_eq!(tracker.record_failure("serving/a"), minutes(1));
        assert_eq!(tracker.error_count("serving/b"), 1);
    }
}
