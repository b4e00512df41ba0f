//! Retry/backoff policy for transient provider page failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy between retries of the same provider page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// base * attempt
    Linear,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// How often and how patiently a failed page fetch is retried.
///
/// `max_attempts` counts every try including the first, so `max_attempts = 3`
/// means one initial fetch plus two retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor in [0.0, 1.0].
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(500), Duration::from_secs(10))
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay to wait after the given failed try (1-indexed).
    pub fn delay_after(&self, failed_try: u32) -> Duration {
        if failed_try == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms * f64::from(failed_try),
            BackoffStrategy::Exponential => base_ms * 2_f64.powi(failed_try.min(30) as i32 - 1),
        };
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        // Jitter is derived from the try number, not a RNG.
        let spread = capped_ms * self.jitter.clamp(0.0, 1.0);
        let offset = if spread > 0.0 {
            let unit = f64::from((failed_try * 37) % 100) / 100.0;
            spread * (unit - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((capped_ms + offset).max(0.0) as u64)
    }

    /// Whether another try is allowed after `tries_so_far` tries.
    pub fn allows_another(&self, tries_so_far: u32) -> bool {
        tries_so_far < self.max_attempts
    }
}
