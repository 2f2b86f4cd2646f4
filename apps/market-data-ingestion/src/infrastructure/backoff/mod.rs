//! Retry Backoff Policy
//!
//! Exponential backoff with jitter for transient broker failures. A worker
//! that cannot receive from its stream waits `next_delay()` before polling
//! again and calls `reset()` after the next successful receive.

use std::time::Duration;

use rand::Rng;

/// Backoff tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Fixed delays with no growth and no jitter.
    #[must_use]
    pub const fn constant(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Per-worker backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    failures: u32,
}

impl Backoff {
    /// Start a fresh policy.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_delay,
            config,
            failures: 0,
        }
    }

    /// Delay to wait after one more failure, jittered from the thread RNG.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::rng())
    }

    /// Delay to wait after one more failure, jittered from `rng`.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.jitter(self.current, rng);
        self.current = self
            .current
            .mul_f64(self.config.multiplier.max(1.0))
            .min(self.config.max_delay);
        delay
    }

    /// Forget accumulated failures.
    pub const fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    fn jitter<R: Rng + ?Sized>(&self, base: Duration, rng: &mut R) -> Duration {
        if self.config.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = self.config.jitter_factor.min(1.0);
        let factor: f64 = rng.random_range(1.0 - spread..=1.0 + spread);
        base.mul_f64(factor).max(Duration::from_millis(1))
    }
}
