//! Redis-backed fixed window shared by every worker process.
//!
//! One Lua script per call keeps check-and-increment atomic on the server:
//! the counter only moves when the request fits, and the first increment of
//! a window sets its expiry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{instrument, trace};

use super::{Admission, RateKey, RateLimitConfig, RateLimitError, RateLimiter};
use crate::clock::{Clock, SystemClock};

const KEY_PREFIX: &str = "leadflow:rate";

// KEYS[1] = bucket, ARGV = n, capacity, window_ms.
// Returns {allowed, remaining, ttl_ms}.
const CHECK_AND_CONSUME: &str = r#"
local used = tonumber(redis.call('GET', KEYS[1]) or '0')
local n = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local window_ms = tonumber(ARGV[3])

if used + n > capacity then
  local ttl = redis.call('PTTL', KEYS[1])
  if ttl < 0 then ttl = window_ms end
  return {0, math.max(capacity - used, 0), ttl}
end

used = redis.call('INCRBY', KEYS[1], n)
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], window_ms)
  ttl = window_ms
end
return {1, capacity - used, ttl}
"#;

#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    script: Arc<redis::Script>,
    default_config: RateLimitConfig,
    operation_configs: HashMap<String, RateLimitConfig>,
    clock: Arc<dyn Clock>,
}

impl RedisRateLimiter {
    /// Connect to Redis (e.g. `redis://localhost:6379`).
    pub async fn connect(
        redis_url: impl AsRef<str>,
        default_config: RateLimitConfig,
    ) -> Result<Self, RateLimitError> {
        default_config.validate()?;
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        let conn = ConnectionManager::new(client).await.map_err(backend)?;

        Ok(Self {
            conn,
            script: Arc::new(redis::Script::new(CHECK_AND_CONSUME)),
            default_config,
            operation_configs: HashMap::new(),
            clock: Arc::new(SystemClock),
        })
    }

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
}

fn backend(err: redis::RedisError) -> RateLimitError {
    RateLimitError::Backend(err.to_string())
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn check_and_consume(&self, key: &RateKey, n: u32) -> Result<Admission, RateLimitError> {
        let config = self.config_for(key.operation());
        config.validate()?;
        let window_ms = u64::try_from(config.window.as_millis()).unwrap_or(u64::MAX);

        let mut conn = self.conn.clone();
        let (allowed, remaining, ttl_ms): (i64, i64, i64) = self
            .script
            .key(format!("{KEY_PREFIX}:{key}"))
            .arg(n)
            .arg(config.capacity)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        trace!(allowed, remaining, ttl_ms, "rate check");
        Ok(Admission {
            allowed: allowed == 1,
            remaining: u32::try_from(remaining.max(0)).unwrap_or(0),
            reset_at: self.clock.now() + chrono::Duration::milliseconds(ttl_ms.max(0)),
        })
    }
}
