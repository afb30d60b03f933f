//! Environment-backed runtime configuration for `feed-tail`.

use std::{env, path::PathBuf, str::FromStr};

use feed_core::{
    DEFAULT_RETRY_INTERVAL_MS, OperationType, RetryPolicies, RetryPolicy, SubscriptionFilter,
};
use feed_runtime::ConsumerConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const DEFAULT_COLLECTION: &str = "orders";
const DEFAULT_CONSUMER_NAME: &str = "feed-tail";
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// How the reconnect delay grows between consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed,
    Exponential,
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("expected 'fixed' or 'exponential', got '{other}'")),
        }
    }
}

/// Runtime configuration used by the tail binary.
#[derive(Debug, Clone, PartialEq)]
pub struct TailConfig {
    /// Collection to watch.
    pub collection: String,
    /// Operation types to forward. Empty means all.
    pub operation_types: Vec<OperationType>,
    /// Checkpoint key for this consumer.
    pub consumer_name: String,
    pub retry_strategy: RetryStrategy,
    /// Fixed delay, or base delay for exponential backoff.
    pub retry_interval_ms: u64,
    /// Upper bound for exponential backoff.
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
    /// Give up after this many consecutive failed reconnects.
    pub retry_max_attempts: Option<u32>,
    /// Persist checkpoints to this JSON file. In-memory when unset.
    pub checkpoint_path: Option<PathBuf>,
    /// Tracing filter directives. `RUST_LOG` still wins when set.
    pub log_filter: Option<String>,
}

impl TailConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let collection = optional_trimmed_env("FEED_TAIL_COLLECTION", &mut lookup)
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_owned());
        let operation_types = parse_operation_types("FEED_TAIL_OPERATIONS", &mut lookup)?;
        let consumer_name = optional_trimmed_env("FEED_TAIL_CONSUMER_NAME", &mut lookup)
            .unwrap_or_else(|| DEFAULT_CONSUMER_NAME.to_owned());

        let retry_strategy =
            parse_optional::<RetryStrategy, _>("FEED_TAIL_RETRY_STRATEGY", &mut lookup)?
                .unwrap_or(RetryStrategy::Fixed);
        let retry_interval_ms =
            parse_optional::<u64, _>("FEED_TAIL_RETRY_INTERVAL_MS", &mut lookup)?
                .unwrap_or(DEFAULT_RETRY_INTERVAL_MS);
        let retry_max_delay_ms =
            parse_optional::<u64, _>("FEED_TAIL_RETRY_MAX_DELAY_MS", &mut lookup)?
                .unwrap_or(DEFAULT_MAX_DELAY_MS);
        let retry_jitter =
            parse_optional::<bool, _>("FEED_TAIL_RETRY_JITTER", &mut lookup)?.unwrap_or(false);
        let retry_max_attempts =
            parse_optional::<u32, _>("FEED_TAIL_RETRY_MAX_ATTEMPTS", &mut lookup)?;
        let checkpoint_path =
            optional_trimmed_env("FEED_TAIL_CHECKPOINT_PATH", &mut lookup).map(PathBuf::from);
        let log_filter = optional_trimmed_env("FEED_TAIL_LOG", &mut lookup);

        if let Some(directives) = &log_filter
            && let Err(err) = EnvFilter::try_new(directives)
        {
            return Err(ConfigError::InvalidValue {
                key: "FEED_TAIL_LOG",
                value: directives.clone(),
                reason: err.to_string(),
            });
        }

        if retry_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FEED_TAIL_RETRY_INTERVAL_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if retry_strategy == RetryStrategy::Exponential && retry_max_delay_ms < retry_interval_ms
        {
            return Err(ConfigError::InvalidValue {
                key: "FEED_TAIL_RETRY_MAX_DELAY_MS",
                value: retry_max_delay_ms.to_string(),
                reason: format!("must not be below the retry interval ({retry_interval_ms})"),
            });
        }

        Ok(Self {
            collection,
            operation_types,
            consumer_name,
            retry_strategy,
            retry_interval_ms,
            retry_max_delay_ms,
            retry_jitter,
            retry_max_attempts,
            checkpoint_path,
            log_filter,
        })
    }

    pub fn filter(&self) -> SubscriptionFilter {
        SubscriptionFilter::new(self.collection.clone())
            .with_operation_types(self.operation_types.iter().copied())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = match self.retry_strategy {
            RetryStrategy::Fixed => RetryPolicy::fixed(self.retry_interval_ms),
            RetryStrategy::Exponential => {
                RetryPolicy::exponential(self.retry_interval_ms, self.retry_max_delay_ms)
            }
        };
        let policy = if self.retry_jitter {
            policy.with_jitter()
        } else {
            policy
        };
        match self.retry_max_attempts {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(self.consumer_name.clone())
            .with_retry(RetryPolicies::uniform(self.retry_policy()))
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_operation_types<F>(
    key: &'static str,
    lookup: &mut F,
) -> Result<Vec<OperationType>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(Vec::new());
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<OperationType>()
                .map_err(|err| ConfigError::InvalidValue {
                    key,
                    value: value.clone(),
                    reason: err.to_string(),
                })
        })
        .collect()
}
