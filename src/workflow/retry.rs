use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;

/// Exponential backoff before retry `attempt` (1-based): base · 2^(attempt−1)
/// plus up to 25 % jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let base = policy.base_delay_ms.saturating_mul(1u64 << shift);
    let jitter = rand::thread_rng().gen_range(0.0..=0.25);

    Duration::from_millis(base + (base as f64 * jitter) as u64)
}
