//! Retry policy for the finalize step.
//!
//! Exponential backoff with jitter: `min(max_delay, base_delay * 2^attempt)`,
//! then scaled by a random factor in `[1 - jitter, 1 + jitter]`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Attempts per finalize round, including the first. At least 1.
    pub max_attempts: u32,
    /// Jitter fraction (0.0–1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Retries immediately, `max_attempts` times. For tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts,
            jitter: 0.0,
        }
        .validated()
    }

    /// Clamp out-of-range values so the policy is safe to use.
    pub fn validated(mut self) -> Self {
        if self.max_attempts == 0 {
            warn!("retry max_attempts is 0, using 1");
            self.max_attempts = 1;
        }
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        let jitter = sane_jitter(self.jitter);
        if jitter != self.jitter {
            warn!(jitter = self.jitter, using = jitter, "retry jitter out of range");
            self.jitter = jitter;
        }
        self
    }

    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff before retry number `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let jitter = sane_jitter(self.jitter);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let scale = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(scale)
    }
}

/// Jitter within `0.0..=1.0`; NaN and infinities become `0.0`.
fn sane_jitter(jitter: f64) -> f64 {
    if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
