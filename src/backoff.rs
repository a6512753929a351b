use std::time::Duration;

use rand::{thread_rng, Rng};

/// Exponential backoff with jitter, used by the sync thread between failed attempts.
///
/// The wait after the `n`-th consecutive failure is `min(base * 2^n, max)`, of which
/// `1 - jitter_fraction` is kept fixed and the rest is randomized. The result never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub(crate) base: Duration,
    pub(crate) max: Duration,
    pub(crate) jitter_fraction: f64,
}

impl BackoffConfig {
    /// Default wait after the first failure.
    pub const DEFAULT_BASE: Duration = Duration::from_millis(100);

    /// Default ceiling for a single wait.
    pub const DEFAULT_MAX: Duration = Duration::from_secs(10);

    /// Default share of each wait that is randomized.
    pub const DEFAULT_JITTER_FRACTION: f64 = 0.9;

    /// Set the wait after the first failure.
    pub fn base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the ceiling for a single wait.
    pub fn max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Set the share of each wait that is randomized. Clamped to `[0, 1]`.
    pub fn jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = if jitter_fraction.is_nan() {
            0.0
        } else {
            jitter_fraction.clamp(0.0, 1.0)
        };
        self
    }

    /// Wait before the next attempt, without jitter.
    pub(crate) fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Wait before the next attempt.
    pub(crate) fn wait(&self, retry: u32) -> Duration {
        let delay = self.delay(retry);
        let fixed = delay.mul_f64(1.0 - self.jitter_fraction);
        let random = delay.mul_f64(2.0 * self.jitter_fraction * thread_rng().gen::<f64>());
        (fixed + random).min(self.max)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base: Self::DEFAULT_BASE,
            max: Self::DEFAULT_MAX,
            jitter_fraction: Self::DEFAULT_JITTER_FRACTION,
        }
    }
}
