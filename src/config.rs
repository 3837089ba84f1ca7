//! Run configuration for a fetch run.
//!
//! [`RunConfiguration`] is built once by the caller, validated, and then
//! read-only for the whole run. Every policy that shapes a run (cache,
//! incremental skip, retries, concurrency, copy and failure handling) is an
//! explicit field here and is handed to the components that need it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, MAX_CONCURRENCY, MAX_RETRIES_LIMIT, MAX_TIMEOUT_SECS, READ_TIMEOUT_SECS,
};
use crate::download::{Backoff, ClientTimeouts, RetryPolicy};

/// What to do with the cache-to-destination copy when the destination exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyPolicy {
    /// Copy after every successful fetch or cache hit.
    #[default]
    Always,
    /// Skip the copy when the destination already holds a file.
    IfMissing,
}

/// What happens to other in-flight resources once one fails terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let every other task finish; report the first failure at the end.
    #[default]
    Drain,
    /// Cancel in-flight and pending tasks as soon as the first failure lands.
    Abort,
}

/// Backoff settings as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Concurrency cap outside `1..=MAX_CONCURRENCY`.
    #[error("invalid concurrency value {value}: must be between 1 and {MAX_CONCURRENCY}")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// Retry count above `MAX_RETRIES_LIMIT`.
    #[error("invalid retries value {value}: must be between 0 and {MAX_RETRIES_LIMIT}")]
    InvalidRetries {
        /// The rejected value.
        value: u32,
    },

    /// Timeout outside `1..=MAX_TIMEOUT_SECS`.
    #[error("invalid {field} value {value}: must be between 1 and {MAX_TIMEOUT_SECS} seconds")]
    InvalidTimeout {
        /// Which timeout.
        field: &'static str,
        /// The rejected value.
        value: u64,
    },

    /// Backoff with a zero base or a maximum below the base.
    #[error("invalid backoff: base {base_delay_ms}ms must be > 0 and <= max {max_delay_ms}ms")]
    InvalidBackoff {
        /// Configured base delay.
        base_delay_ms: u64,
        /// Configured maximum delay.
        max_delay_ms: u64,
    },
}

/// Configuration for one fetch run.
///
/// # Example
///
/// ```
/// use fetcher_core::{CopyPolicy, RunConfiguration};
///
/// let config = RunConfiguration::new("./public")
///     .with_cache_dir("./.cache/resources")
///     .with_max_retries(2)
///     .with_max_concurrency(Some(4))
///     .with_copy_policy(CopyPolicy::IfMissing);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfiguration {
    /// Directory resources are materialized into.
    pub destination_dir: PathBuf,
    /// Shared cache directory; when set, resources are fetched here and copied.
    pub cache_dir: Option<PathBuf>,
    /// Skip fetching when the destination file already exists (direct mode).
    pub incremental: bool,
    /// Retries per resource after the first attempt.
    pub max_retries: u32,
    /// Maximum simultaneously in-flight fetches; `None` is unbounded.
    pub max_concurrency: Option<usize>,
    /// Cache-to-destination copy behaviour.
    pub copy_policy: CopyPolicy,
    /// Sibling handling after the first terminal failure.
    pub failure_policy: FailurePolicy,
    /// Cap on one complete attempt, in seconds.
    pub attempt_timeout_secs: Option<u64>,
    /// HTTP connect timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP request timeout, in seconds.
    pub read_timeout_secs: u64,
    /// Optional exponential backoff between attempts.
    pub backoff: Option<BackoffConfig>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            destination_dir: PathBuf::from("."),
            cache_dir: None,
            incremental: false,
            max_retries: 0,
            max_concurrency: None,
            copy_policy: CopyPolicy::default(),
            failure_policy: FailurePolicy::default(),
            attempt_timeout_secs: None,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            backoff: None,
        }
    }
}

impl RunConfiguration {
    /// Creates a configuration with defaults writing into `destination_dir`.
    #[must_use]
    pub fn new(destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the shared cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Enables or disables incremental skip.
    #[must_use]
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Sets the number of retries per resource.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the concurrency cap (`None` for unbounded).
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the cache copy policy.
    #[must_use]
    pub fn with_copy_policy(mut self, copy_policy: CopyPolicy) -> Self {
        self.copy_policy = copy_policy;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Sets the per-attempt timeout in seconds.
    #[must_use]
    pub fn with_attempt_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.attempt_timeout_secs = secs;
        self
    }

    /// Sets exponential backoff between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Option<BackoffConfig>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the destination directory.
    #[must_use]
    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Returns the cache directory, if configured.
    #[must_use]
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Checks every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(value) = self.max_concurrency
            && !(1..=MAX_CONCURRENCY).contains(&value)
        {
            return Err(ConfigError::InvalidConcurrency { value });
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidRetries {
                value: self.max_retries,
            });
        }
        validate_timeout("attempt_timeout_secs", self.attempt_timeout_secs)?;
        validate_timeout("connect_timeout_secs", Some(self.connect_timeout_secs))?;
        validate_timeout("read_timeout_secs", Some(self.read_timeout_secs))?;
        if let Some(backoff) = self.backoff
            && (backoff.base_delay_ms == 0 || backoff.max_delay_ms < backoff.base_delay_ms)
        {
            return Err(ConfigError::InvalidBackoff {
                base_delay_ms: backoff.base_delay_ms,
                max_delay_ms: backoff.max_delay_ms,
            });
        }
        Ok(())
    }

    /// Builds the retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_retries);
        match self.backoff {
            Some(backoff) => policy.with_backoff(Backoff::new(
                Duration::from_millis(backoff.base_delay_ms),
                Duration::from_millis(backoff.max_delay_ms),
            )),
            None => policy,
        }
    }

    /// Builds the HTTP client timeouts described by this configuration.
    #[must_use]
    pub fn client_timeouts(&self) -> ClientTimeouts {
        ClientTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            read: Duration::from_secs(self.read_timeout_secs),
            attempt: self.attempt_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn validate_timeout(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
        return Err(ConfigError::InvalidTimeout { field, value });
    }
    Ok(())
}
