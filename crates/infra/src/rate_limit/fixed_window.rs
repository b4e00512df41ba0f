use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

use super::{Admission, RateKey, RateLimitConfig, RateLimitError, RateLimiter};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy)]
struct Window {
    used: u32,
    reset_at: DateTime<Utc>,
}

/// In-process fixed-window limiter, one window per [`RateKey`].
///
/// The whole check-and-increment runs under one mutex with no await point,
/// so concurrent workers for the same tenant cannot both see the last unit.
pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    default_config: RateLimitConfig,
    operation_configs: HashMap<String, RateLimitConfig>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowRateLimiter {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self::with_clock(default_config, Arc::new(SystemClock))
    }

    pub fn with_clock(default_config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            default_config,
            operation_configs: HashMap::new(),
            clock,
        }
    }

    /// Override the limits for one operation.
    pub fn with_operation(mut self, operation: impl Into<String>, config: RateLimitConfig) -> Self {
        self.operation_configs.insert(operation.into(), config);
        self
    }

    fn config_for(&self, operation: &str) -> RateLimitConfig {
        self.operation_configs
            .get(operation)
            .copied()
            .unwrap_or(self.default_config)
    }

    /// Same as [`RateLimiter::check_and_consume`] at an explicit instant.
    pub fn check_and_consume_at(
        &self,
        key: &RateKey,
        n: u32,
        now: DateTime<Utc>,
    ) -> Result<Admission, RateLimitError> {
        let config = self.config_for(key.operation());
        config.validate()?;
        let window_len = chrono::Duration::from_std(config.window)
            .map_err(|e| RateLimitError::InvalidConfig(e.to_string()))?;

        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let window = match windows.entry(key.as_str().to_string()) {
            Entry::Occupied(entry) => {
                let w = entry.into_mut();
                if now >= w.reset_at {
                    *w = Window {
                        used: 0,
                        reset_at: now + window_len,
                    };
                }
                w
            }
            Entry::Vacant(entry) => entry.insert(Window {
                used: 0,
                reset_at: now + window_len,
            }),
        };

        let allowed = window.used.saturating_add(n) <= config.capacity;
        if allowed {
            window.used += n;
        }
        trace!(key = %key, n, allowed, used = window.used, "rate check");

        Ok(Admission {
            allowed,
            remaining: config.capacity.saturating_sub(window.used),
            reset_at: window.reset_at,
        })
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check_and_consume(&self, key: &RateKey, n: u32) -> Result<Admission, RateLimitError> {
        self.check_and_consume_at(key, n, self.clock.now())
    }
}
