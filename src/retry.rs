//! Retry tuning for the request pipeline.
//!
//! Only transport failures are retried — once response headers arrive the
//! budget freezes to zero. The budget itself comes from the client or the
//! per-call options; this module supplies the delay schedule between
//! redispatches.

use std::time::Duration;

/// Delay schedule applied between retry attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first redispatch; doubles on each further attempt.
    pub initial_delay: Duration,
    /// Ceiling for the doubled delay.
    pub max_delay: Duration,
    /// Randomise each delay downward by up to half.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            jitter: true,
        }
    }
}

/// The delay before redispatch number `attempt` (zero-based): the initial
/// delay doubled per attempt, capped at `max_delay`. With jitter on, the
/// result is drawn uniformly from the upper half of `[0, delay]` so
/// concurrent clients spread out instead of redialling in lockstep.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    // Shifts past the cap would overflow long before max_delay matters
    let doublings = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let delay = config
        .initial_delay
        .saturating_mul(doublings)
        .min(config.max_delay);

    if config.jitter {
        delay.mul_f64(fastrand::f64().mul_add(0.5, 0.5))
    } else {
        delay
    }
}
