//! Exponential backoff with jitter for scheduling task retries.

use std::time::Duration;

use rand::Rng;

/// Tuning for [`delay_for`]/[`jittered`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            multiplier: 6.0,
            max: Duration::from_secs(600),
        }
    }
}

/// Compute the deterministic (non-jittered) delay before retry `retry_count`
/// (1-indexed: the first retry is `retry_count == 1`).
///
/// `delay = clamp(base * multiplier^retry_count, 0, max)`.
pub fn delay_for(retry_count: u32, config: &BackoffConfig) -> Duration {
    let factor = config.multiplier.powi(retry_count as i32);
    let secs = config.base.as_secs_f64() * factor;
    let capped = secs.min(config.max.as_secs_f64()).max(0.0);
    Duration::from_secs_f64(capped)
}

/// Apply uniform jitter in `[0.8, 1.2]` to a computed delay.
pub fn jittered(delay: Duration, rng: &mut impl Rng) -> Duration {
    let factor: f64 = rng.random_range(0.8..=1.2);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Convenience: compute the jittered delay for a given retry count in one
/// call, using the thread-local RNG.
pub fn next_delay(retry_count: u32, config: &BackoffConfig) -> Duration {
    let base = delay_for(retry_count, config);
    jittered(base, &mut rand::rng())
}
