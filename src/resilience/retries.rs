//! Per-part retry policy.
//!
//! # Responsibilities
//! - Decide whether a failed attempt may be retried
//! - Compute the delay before the next attempt
//!
//! # Design Decisions
//! - `retries` counts extra attempts: `retries = 2` allows three calls in total
//! - Transport errors and non-2xx statuses are both retryable

use std::time::Duration;

use crate::config::BatchConfig;
use crate::resilience::backoff::calculate_backoff;

/// Retry budget and backoff shape for every part of one batch connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts allowed after the first one fails.
    pub retries: u32,
    /// Upper bound of the random jitter, in milliseconds.
    pub jitter_ms: u64,
    /// Delay added per attempt already made, in milliseconds.
    pub step_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            retries: config.retries,
            jitter_ms: config.retry_jitter_ms,
            step_ms: config.retry_step_ms,
        }
    }

    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.retries
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.jitter_ms, self.step_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_counts_extra_attempts() {
        let policy = RetryPolicy { retries: 2, jitter_ms: 0, step_ms: 10 };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn zero_retries_never_retries() {
        let policy = RetryPolicy { retries: 0, ..RetryPolicy::default() };
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn delay_escalates_with_attempts() {
        let policy = RetryPolicy { retries: 5, jitter_ms: 0, step_ms: 10 };
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(4), Duration::from_millis(40));
    }
}
