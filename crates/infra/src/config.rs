//! Runtime configuration.
//!
//! Everything has a default; `LEADFLOW_*` environment variables override
//! individual fields. Durations are given in milliseconds or seconds as the
//! variable name says.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::jobs::{EmailDispatchConfig, MAX_EXPORT_BATCH, PipelineConfig, WorkerPoolConfig};
use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Parse { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    OutOfRange { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadflowConfig {
    pub pipeline: PipelineConfig,
    pub email: EmailDispatchConfig,
    /// Default window for the email send operation.
    pub email_rate_limit: RateLimitConfig,
    pub workers: WorkerPoolConfig,
    /// Rate limiter backend; in-process when unset.
    pub redis_url: Option<String>,
}

impl LeadflowConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok()).context("invalid LEADFLOW_* configuration")
    }

    /// Read overrides through `lookup`, then validate.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        set(&lookup, "LEADFLOW_MAX_PAGES", &mut config.pipeline.max_pages)?;
        set(&lookup, "LEADFLOW_EXPORT_BATCH_SIZE", &mut config.pipeline.export_batch_size)?;
        set_millis(&lookup, "LEADFLOW_INTER_BATCH_DELAY_MS", &mut config.pipeline.inter_batch_delay)?;
        set_secs(&lookup, "LEADFLOW_FETCH_TIMEOUT_SECS", &mut config.pipeline.fetch_timeout)?;
        set(&lookup, "LEADFLOW_PAGE_RETRY_ATTEMPTS", &mut config.pipeline.page_retry.max_attempts)?;
        set(
            &lookup,
            "LEADFLOW_MAX_CONSECUTIVE_PAGE_FAILURES",
            &mut config.pipeline.max_consecutive_page_failures,
        )?;

        set_secs(&lookup, "LEADFLOW_SEND_TIMEOUT_SECS", &mut config.email.send_timeout)?;
        set_secs(&lookup, "LEADFLOW_TOKEN_REFRESH_SKEW_SECS", &mut config.email.refresh_skew)?;
        set(&lookup, "LEADFLOW_EMAIL_RATE_CAPACITY", &mut config.email_rate_limit.capacity)?;
        set_secs(&lookup, "LEADFLOW_EMAIL_RATE_WINDOW_SECS", &mut config.email_rate_limit.window)?;

        set(&lookup, "LEADFLOW_CAMPAIGN_CONCURRENCY", &mut config.workers.campaign_concurrency)?;
        set(&lookup, "LEADFLOW_EMAIL_CONCURRENCY", &mut config.workers.email_concurrency)?;

        config.redis_url = lookup("LEADFLOW_REDIS_URL").filter(|url| !url.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let batch = self.pipeline.export_batch_size;
        if batch == 0 || batch > MAX_EXPORT_BATCH {
            return Err(ConfigError::OutOfRange {
                var: "LEADFLOW_EXPORT_BATCH_SIZE",
                reason: format!("must be within 1..={MAX_EXPORT_BATCH} (got {batch})"),
            });
        }
        if self.pipeline.max_pages == 0 {
            return Err(out_of_range("LEADFLOW_MAX_PAGES", "must be positive"));
        }
        if self.pipeline.page_retry.max_attempts == 0 {
            return Err(out_of_range("LEADFLOW_PAGE_RETRY_ATTEMPTS", "must be positive"));
        }
        if self.pipeline.max_consecutive_page_failures == 0 {
            return Err(out_of_range("LEADFLOW_MAX_CONSECUTIVE_PAGE_FAILURES", "must be positive"));
        }
        if self.email_rate_limit.validate().is_err() {
            return Err(out_of_range(
                "LEADFLOW_EMAIL_RATE_CAPACITY",
                "capacity and window must be positive",
            ));
        }
        if self.workers.campaign_concurrency == 0 {
            return Err(out_of_range("LEADFLOW_CAMPAIGN_CONCURRENCY", "must be positive"));
        }
        if self.workers.email_concurrency == 0 {
            return Err(out_of_range("LEADFLOW_EMAIL_CONCURRENCY", "must be positive"));
        }
        Ok(())
    }
}

fn out_of_range(var: &'static str, reason: &str) -> ConfigError {
    ConfigError::OutOfRange {
        var,
        reason: reason.to_string(),
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse() {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(ConfigError::Parse { var, value: raw }),
    }
}

fn set<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, field: &mut T) -> Result<(), ConfigError> {
    if let Some(value) = parse(lookup, var)? {
        *field = value;
    }
    Ok(())
}

fn set_millis(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, field: &mut Duration) -> Result<(), ConfigError> {
    if let Some(ms) = parse::<u64>(lookup, var)? {
        *field = Duration::from_millis(ms);
    }
    Ok(())
}

fn set_secs(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, field: &mut Duration) -> Result<(), ConfigError> {
    if let Some(secs) = parse::<u64>(lookup, var)? {
        *field = Duration::from_secs(secs);
    }
    Ok(())
}
