//! Retry policy for transient exchange failures.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// Attempt numbers are 1-based. `delay_for(n)` returns the wait before
/// attempt `n + 1`, or `None` when the attempt budget is exhausted.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts allowed (including the first)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub wait_min: Duration,
    /// Cap on any single delay
    pub wait_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait_min: Duration, wait_max: Duration) -> Self {
        Self { max_attempts, wait_min, wait_max }
    }

    /// Delay to sleep after a failed attempt `attempt`, doubling each
    /// time up to `wait_max`. `None` means stop retrying.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }

        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.wait_min.saturating_mul(factor);
        Some(delay.min(self.wait_max))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_min: Duration::from_millis(500),
            wait_max: Duration::from_secs(4),
        }
    }
}
