//! Redelivery schedule for outbound messages.
//!
//! Delays double from `base_delay` up to `max_delay`. Each delay is spread by
//! up to `jitter` of itself in either direction so that fan-out retries to
//! the same endpoint do not land together.

use std::time::Duration;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(Self::DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(Self::DEFAULT_MAX_DELAY_MS),
            jitter: Self::DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 5;
    pub const DEFAULT_BASE_DELAY_MS: u64 = 200;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
    pub const DEFAULT_JITTER: f64 = 0.1;

    /// Same delay before every retry, no jitter. Used by tests.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let doubled = self
            .base_delay
            .saturating_mul(1u32 << (retry - 1).min(20));
        let delay = doubled.min(self.max_delay);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        // Uniform in [-1, 1).
        let unit = (Uuid::new_v4().as_u128() as u64) as f64 / u64::MAX as f64 * 2.0 - 1.0;
        delay.mul_f64((1.0 + jitter * unit).max(0.0))
    }
}
