//! Bounded retry policy with optional exponential backoff.
//!
//! Every attempt failure is retryable: the policy only looks at how many
//! attempts have been made. Attempts are 0-indexed, so with `max_retries = N`
//! a resource gets attempts `0..=N`, i.e. `N + 1` in total.
//!
//! # Example
//!
//! ```
//! use fetcher_core::download::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(2);
//! assert!(matches!(policy.should_retry(0), RetryDecision::Retry { attempt: 1, .. }));
//! assert!(matches!(policy.should_retry(2), RetryDecision::DoNotRetry { .. }));
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default maximum retries (no retry).
pub const DEFAULT_MAX_RETRIES: u32 = 0;

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to backoff delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after `delay`.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// Index of the next attempt.
        attempt: u32,
    },

    /// Give up on this resource.
    DoNotRetry {
        /// Human-readable reason why no retry is attempted.
        reason: String,
    },
}

/// Exponential backoff settings.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f32,
}

impl Backoff {
    /// Creates a doubling backoff starting at `base_delay`, capped at `max_delay`.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Delay before `attempt` (1-indexed retry number), without jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay_for(attempt) + self.jitter()
    }

    /// Random jitter in `0..=min(MAX_JITTER, base_delay)`.
    ///
    /// Keeps resources that failed together from retrying in lockstep.
    fn jitter(&self) -> Duration {
        let cap = MAX_JITTER.min(self.base_delay).as_millis() as u64;
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
    }
}

/// Retry configuration for a fetch run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Option<Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries with no delay between attempts.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: None,
        }
    }

    /// Adds exponential backoff between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Returns the configured maximum number of retries.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the backoff settings, if any.
    #[must_use]
    pub fn backoff(&self) -> Option<&Backoff> {
        self.backoff.as_ref()
    }

    /// Whether a task carrying `attempt` is past the limit and must not run.
    #[must_use]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }

    /// Decides what happens after attempt `attempt` (0-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            debug!(attempt, "max retries reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let next_attempt = attempt + 1;
        let delay = self
            .backoff
            .as_ref()
            .map_or(Duration::ZERO, |backoff| backoff.delay_for(next_attempt));

        debug!(
            attempt,
            next_attempt,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: next_attempt,
        }
    }
}
