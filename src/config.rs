//! # Engine Configuration
//!
//! Environment-aware configuration for the batch engine and the scheduler.
//! Every value has a code default from [`crate::constants::defaults`]; the
//! `MERCATO_*` environment variables override them with validated parsing.

use crate::constants::defaults;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-item retry behaviour with exponential backoff.
///
/// Between attempt `k` and attempt `k + 1` the engine waits
/// `base_delay * backoff_multiplier^(k - 1)`, so the defaults produce the
/// 1s, 2s, 4s, ... progression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per item, including the first one
    pub attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Growth factor applied per further attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: defaults::RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the 1-indexed `attempt` failed.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .mul_f64(self.backoff_multiplier.powi(exponent as i32))
    }
}

/// Sizing defaults and snapshot retention for [`crate::BatchProcessor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub default_batch_size: usize,
    pub default_max_concurrency: usize,
    pub retry: RetryPolicy,
    /// Retention window for persisted progress snapshots
    pub snapshot_ttl: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_batch_size: defaults::BATCH_SIZE,
            default_max_concurrency: defaults::MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            snapshot_ttl: Duration::from_secs(defaults::SNAPSHOT_TTL_SECONDS),
        }
    }
}

/// Cadence and lead times for [`crate::SchedulingManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval of the recurring schedule armed per registered batch job
    pub recurring_interval: Duration,
    /// How far before an event's start its notification fires
    pub event_start_lead: Duration,
    /// How far before a coupon's expiry its reminder fires
    pub coupon_expiry_lead: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recurring_interval: Duration::from_secs(defaults::RECURRING_INTERVAL_SECONDS),
            event_start_lead: Duration::from_secs(defaults::EVENT_START_LEAD_SECONDS),
            coupon_expiry_lead: Duration::from_secs(defaults::COUPON_EXPIRY_LEAD_SECONDS),
        }
    }
}

/// Top-level configuration handed to the engine at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub batch: BatchConfig,
    pub scheduler: SchedulerConfig,
}

impl CoreConfig {
    /// Build a configuration from defaults plus `MERCATO_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(batch_size) = parse_env("MERCATO_BATCH_SIZE")? {
            config.batch.default_batch_size = batch_size;
        }
        if let Some(max_concurrency) = parse_env("MERCATO_MAX_CONCURRENCY")? {
            config.batch.default_max_concurrency = max_concurrency;
        }
        if let Some(attempts) = parse_env("MERCATO_RETRY_ATTEMPTS")? {
            config.batch.retry.attempts = attempts;
        }
        if let Some(base_ms) = parse_env::<u64>("MERCATO_RETRY_BASE_MS")? {
            config.batch.retry.base_delay = Duration::from_millis(base_ms);
        }
        if let Some(ttl) = parse_env::<u64>("MERCATO_SNAPSHOT_TTL_SECONDS")? {
            config.batch.snapshot_ttl = Duration::from_secs(ttl);
        }
        if let Some(interval) = parse_env::<u64>("MERCATO_RECURRING_INTERVAL_SECONDS")? {
            config.scheduler.recurring_interval = Duration::from_secs(interval);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|e| {
            CoreError::Configuration(format!("Invalid {name}: {e}"))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = CoreConfig::default();
        assert_eq!(config.batch.default_batch_size, 1000);
        assert_eq!(config.batch.default_max_concurrency, 5);
        assert_eq!(config.batch.retry.attempts, 3);
        assert_eq!(config.batch.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.batch.snapshot_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_backoff_progression() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_after_attempt(1), Duration::from_secs(1));
        assert_eq!(retry.delay_after_attempt(2), Duration::from_secs(2));
        assert_eq!(retry.delay_after_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        std::env::set_var("MERCATO_BATCH_SIZE", "not-a-number");
        let result = CoreConfig::from_env();
        std::env::remove_var("MERCATO_BATCH_SIZE");

        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }
}
