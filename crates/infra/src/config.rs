//! Configuration loading and representation.
//!
//! Every tunable the workflows use is carried in [`ServiceConfig`] and handed
//! to constructors; nothing reads the environment after startup.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use invoicemgmt_observability::LogFormat;

use crate::retry::RetryPolicy;

pub const WORKER_COUNT: &str = "INVOICEMGMT_WORKER_COUNT";
pub const TENANT_PARALLELISM: &str = "INVOICEMGMT_TENANT_PARALLELISM";
pub const GENERATION_MAX_ATTEMPTS: &str = "INVOICEMGMT_GENERATION_MAX_ATTEMPTS";
pub const SCHEDULE_MAX_ATTEMPTS: &str = "INVOICEMGMT_SCHEDULE_MAX_ATTEMPTS";
pub const PAYMENT_SEQUENCE_MAX_ATTEMPTS: &str = "INVOICEMGMT_PAYMENT_SEQUENCE_MAX_ATTEMPTS";
pub const RETRY_BASE_DELAY_MS: &str = "INVOICEMGMT_RETRY_BASE_DELAY_MS";
pub const RETRY_JITTER: &str = "INVOICEMGMT_RETRY_JITTER";
pub const LOG_FORMAT: &str = "INVOICEMGMT_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration for the invoice workflows.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Workers used to generate invoices in parallel.
    pub worker_count: usize,
    /// Tenants processed concurrently by the schedule checker.
    pub tenant_parallelism: usize,
    /// Per-invoice generation transaction.
    pub generation_retry: RetryPolicy,
    /// Schedule finalisation transaction.
    pub schedule_retry: RetryPolicy,
    /// Issuance transactions that assign payment sequence numbers; these see
    /// the most contention.
    pub payment_sequence_retry: RetryPolicy,
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let backoff = RetryPolicy::fixed(1, Duration::from_millis(10));
        let backoff = RetryPolicy { jitter: 0.1, ..backoff };
        Self {
            worker_count: 8,
            tenant_parallelism: 4,
            generation_retry: backoff.clone().with_max_attempts(10),
            schedule_retry: backoff.clone().with_max_attempts(10),
            payment_sequence_retry: backoff.with_max_attempts(150),
            log_format: LogFormat::Json,
        }
    }
}

impl ServiceConfig {
    /// Load from `INVOICEMGMT_*` environment variables, falling back to
    /// defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let worker_count = positive(&lookup, WORKER_COUNT, defaults.worker_count)?;
        let tenant_parallelism =
            positive(&lookup, TENANT_PARALLELISM, defaults.tenant_parallelism)?;
        let generation_attempts = positive(
            &lookup,
            GENERATION_MAX_ATTEMPTS,
            defaults.generation_retry.max_attempts as usize,
        )?;
        let schedule_attempts = positive(
            &lookup,
            SCHEDULE_MAX_ATTEMPTS,
            defaults.schedule_retry.max_attempts as usize,
        )?;
        let payment_attempts = positive(
            &lookup,
            PAYMENT_SEQUENCE_MAX_ATTEMPTS,
            defaults.payment_sequence_retry.max_attempts as usize,
        )?;

        let base_delay_ms: u64 = parsed(
            &lookup,
            RETRY_BASE_DELAY_MS,
            defaults.generation_retry.base_delay.as_millis() as u64,
        )?;
        let jitter: f64 = parsed(&lookup, RETRY_JITTER, defaults.generation_retry.jitter)?;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::Invalid {
                key: RETRY_JITTER,
                value: jitter.to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }
        let log_format = parsed(&lookup, LOG_FORMAT, defaults.log_format)?;

        let backoff = RetryPolicy {
            jitter,
            ..RetryPolicy::fixed(1, Duration::from_millis(base_delay_ms))
        };

        Ok(Self {
            worker_count,
            tenant_parallelism,
            generation_retry: backoff.clone().with_max_attempts(to_attempts(generation_attempts)),
            schedule_retry: backoff.clone().with_max_attempts(to_attempts(schedule_attempts)),
            payment_sequence_retry: backoff.with_max_attempts(to_attempts(payment_attempts)),
            log_format,
        })
    }

    /// Same configuration without sleeps between retries.
    pub fn without_backoff(mut self) -> Self {
        for policy in [
            &mut self.generation_retry,
            &mut self.schedule_retry,
            &mut self.payment_sequence_retry,
        ] {
            *policy = RetryPolicy::immediate(policy.max_attempts);
        }
        self
    }
}

fn to_attempts(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn parsed<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => {
            warn!(key, default = ?default, "empty configuration value; using default");
            Ok(default)
        }
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn positive<F>(lookup: &F, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parsed(lookup, key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
