//! # Fibonacci Backoff
//!
//! Per-key requeue delays for failed reconciles.
//!
//! The delay grows along the Fibonacci sequence, which is slower than
//! exponential growth, and is capped at a maximum.
//! With the default bounds the sequence is 1s, 1s, 2s, 3s, 5s, 8s, ... 300s.

use std::time::Duration;

use crate::constants::{RECONCILE_BACKOFF_MAX_SECS, RECONCILE_BACKOFF_MIN_SECS};

#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(RECONCILE_BACKOFF_MIN_SECS, RECONCILE_BACKOFF_MAX_SECS)
    }
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_secs` and capped at `max_secs`
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs: max_secs.max(min_secs),
        }
    }

    /// Return the current delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        Duration::from_secs(result)
    }

    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::default();
        let seq: Vec<u64> = (0..8).map(|_| secs(&mut backoff)).collect();
        assert_eq!(seq, vec![1, 1, 2, 3, 5, 8, 13, 21]);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        for _ in 0..6 {
            secs(&mut backoff);
        }
        // 13 capped to 10
        assert_eq!(secs(&mut backoff), 10);
        assert_eq!(secs(&mut backoff), 10);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(2, 60);
        assert_eq!(secs(&mut backoff), 2);
        assert_eq!(secs(&mut backoff), 2);
        assert_eq!(secs(&mut backoff), 4);
        backoff.reset();
        assert_eq!(secs(&mut backoff), 2);
    }
}
