//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retrying after failed attempt number `attempt` (1-based).
///
/// `min(base * 2^attempt, max)`, replaced by a uniform draw from
/// `[0, delay]` when `full_jitter` is set.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, full_jitter: bool) -> Duration {
    let capped = exponential_delay(attempt, base, max);
    if full_jitter {
        apply_full_jitter(capped)
    } else {
        capped
    }
}

/// The un-jittered, capped exponential delay.
pub fn exponential_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let max_ms = max.as_millis().min(u64::MAX as u128) as u64;

    let factor = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(factor);

    Duration::from_millis(delay_ms.min(max_ms))
}

/// Uniformly random delay in `[0, delay]`.
pub fn apply_full_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis().min(u64::MAX as u128) as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
}
