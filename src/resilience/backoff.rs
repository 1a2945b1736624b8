//! Escalating backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Delay before retrying after `attempt` failed: a random jitter below
/// `jitter_ms` plus `attempt × step_ms`.
pub fn calculate_backoff(attempt: u32, jitter_ms: u64, step_ms: u64) -> Duration {
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..jitter_ms)
    } else {
        0
    };

    let escalation = step_ms.saturating_mul(u64::from(attempt));
    Duration::from_millis(escalation.saturating_add(jitter))
}
