//! Per-tenant admission control.
//!
//! A limiter answers one question atomically: may `n` more units of
//! `operation` run for this tenant in the current window? Denials consume
//! nothing and carry the instant the window resets, so callers can
//! reschedule instead of sleeping inside a worker slot.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_core::TenantId;

mod fixed_window;
#[cfg(feature = "redis")]
mod redis_window;

pub use fixed_window::FixedWindowRateLimiter;
#[cfg(feature = "redis")]
pub use redis_window::RedisRateLimiter;

/// Operation name used for outbound email sends.
pub const EMAIL_SEND: &str = "email.send";

/// Bucket key: `"{operation}:{tenant}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    operation: String,
    key: String,
}

impl RateKey {
    pub fn new(operation: impl Into<String>, tenant_id: TenantId) -> Self {
        let operation = operation.into();
        let key = format!("{operation}:{tenant_id}");
        Self { operation, key }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl core::fmt::Display for RateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Window size and capacity for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Units admitted per window.
    pub capacity: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(capacity: u32, window: Duration) -> Result<Self, RateLimitError> {
        let config = Self { capacity, window };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.capacity == 0 {
            return Err(RateLimitError::InvalidConfig("capacity must be positive".into()));
        }
        if self.window.is_zero() {
            return Err(RateLimitError::InvalidConfig("window must be positive".into()));
        }
        Ok(())
    }
}

/// Result of a `check_and_consume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Units left in the current window after this call.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
}

impl Admission {
    /// Delay until the window resets, zero if it already has.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("invalid rate limit config: {0}")]
    InvalidConfig(String),
    #[error("rate limiter backend unavailable: {0}")]
    Backend(String),
}

/// Atomic check-and-increment admission gate.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_and_consume(&self, key: &RateKey, n: u32) -> Result<Admission, RateLimitError>;
}
