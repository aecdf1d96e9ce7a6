//! Engine configuration.
//!
//! Every setting can be supplied through a `CLICKQL_*` environment variable;
//! anything unset falls back to its default. Values are validated once at
//! load time.

mod database;

pub use database::DatabaseConfig;

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

/// Prefix shared by every configuration variable.
pub const ENV_PREFIX: &str = "CLICKQL_";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: String,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A parsed value is out of range.
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Total attempts per execution, including the first.
    #[validate(range(min = 1, message = "max_attempts must be at least 1"))]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor of the delay after each retry.
    #[validate(range(min = 1.0, message = "backoff_multiplier must be at least 1.0"))]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Metrics settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct MetricsConfig {
    /// Samples retained in the history ring buffer.
    #[validate(range(min = 1, message = "metrics capacity must be at least 1"))]
    pub capacity: usize,
    /// Executions slower than this many milliseconds are reported as slow.
    pub slow_query_ms: u64,
    /// Maximum entries in the slow-query list.
    pub slow_query_limit: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            slow_query_ms: 1000,
            slow_query_limit: 10,
        }
    }
}

impl MetricsConfig {
    /// Slow-query threshold.
    #[must_use]
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EngineConfig {
    /// Database connection settings.
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// Pool size.
    #[validate(range(min = 1, message = "workers must be at least 1"))]
    pub workers: usize,
    /// Maximum wait for a pool slot, in milliseconds. Unset waits forever.
    pub acquire_timeout_ms: Option<u64>,
    /// Retry settings.
    #[validate(nested)]
    pub retry: RetryConfig,
    /// Metrics settings.
    #[validate(nested)]
    pub metrics: MetricsConfig,
    /// Maximum selection depth. Unset disables the depth guard.
    pub max_depth: Option<usize>,
    /// Exempt `__`-prefixed root selections from the depth guard.
    pub ignore_introspection: bool,
    /// Limit applied to list requests that carry none. Unset means unbounded.
    pub default_limit: Option<u64>,
    /// Log SQL text and parameters at INFO.
    pub log_queries: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            workers: 4,
            acquire_timeout_ms: None,
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
            max_depth: None,
            ignore_introspection: true,
            default_limit: None,
            log_queries: false,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CLICKQL_WORKERS`: pool size (default: 4)
    /// - `CLICKQL_ACQUIRE_TIMEOUT_MS`: slot wait limit (default: unset)
    /// - `CLICKQL_MAX_ATTEMPTS`: attempts per execution (default: 3)
    /// - `CLICKQL_BASE_DELAY_MS`: first retry delay (default: 100)
    /// - `CLICKQL_BACKOFF_MULTIPLIER`: delay growth factor (default: 2.0)
    /// - `CLICKQL_METRICS_CAPACITY`: retained samples (default: 10000)
    /// - `CLICKQL_SLOW_QUERY_MS`: slow-query threshold (default: 1000)
    /// - `CLICKQL_SLOW_QUERY_LIMIT`: slow-query list size (default: 10)
    /// - `CLICKQL_MAX_DEPTH`: selection depth limit (default: unset)
    /// - `CLICKQL_IGNORE_INTROSPECTION`: exempt `__` roots (default: true)
    /// - `CLICKQL_DEFAULT_LIMIT`: list limit when none given (default: unset)
    /// - `CLICKQL_LOG_QUERIES`: log SQL at INFO (default: false)
    /// - `CLICKQL_DB_*`: see [`DatabaseConfig::from_env`]
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or a value is
    /// out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            database: DatabaseConfig::from_lookup(&lookup),
            workers: parse_var(&lookup, "WORKERS")?.unwrap_or(defaults.workers),
            acquire_timeout_ms: parse_var(&lookup, "ACQUIRE_TIMEOUT_MS")?,
            retry: RetryConfig {
                max_attempts: parse_var(&lookup, "MAX_ATTEMPTS")?
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay_ms: parse_var(&lookup, "BASE_DELAY_MS")?
                    .unwrap_or(defaults.retry.base_delay_ms),
                backoff_multiplier: parse_var(&lookup, "BACKOFF_MULTIPLIER")?
                    .unwrap_or(defaults.retry.backoff_multiplier),
            },
            metrics: MetricsConfig {
                capacity: parse_var(&lookup, "METRICS_CAPACITY")?
                    .unwrap_or(defaults.metrics.capacity),
                slow_query_ms: parse_var(&lookup, "SLOW_QUERY_MS")?
                    .unwrap_or(defaults.metrics.slow_query_ms),
                slow_query_limit: parse_var(&lookup, "SLOW_QUERY_LIMIT")?
                    .unwrap_or(defaults.metrics.slow_query_limit),
            },
            max_depth: parse_var(&lookup, "MAX_DEPTH")?,
            ignore_introspection: parse_var(&lookup, "IGNORE_INTROSPECTION")?
                .unwrap_or(defaults.ignore_introspection),
            default_limit: parse_var(&lookup, "DEFAULT_LIMIT")?,
            log_queries: parse_var(&lookup, "LOG_QUERIES")?.unwrap_or(defaults.log_queries),
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the maximum selection depth.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Sets the default list limit.
    #[must_use]
    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.default_limit = Some(limit);
        self
    }

    /// Sets the slot acquisition timeout.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Slot acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_var<T, F>(lookup: &F, suffix: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let var = format!("{ENV_PREFIX}{suffix}");
    match lookup(&var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
