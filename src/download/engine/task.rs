//! One attempt of one resource, and what happens after it.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{FetchStats, RunError};
use crate::download::cache::{self, Origin, StoragePolicy};
use crate::download::client::ResourceWriter;
use crate::download::queue::TaskOutcome;
use crate::download::retry::{RetryDecision, RetryPolicy};
use crate::manifest::Resource;

/// A single scheduled attempt for a resource.
#[derive(Debug, Clone)]
pub struct FetchTask {
    /// The resource being fetched. Shared across attempts.
    pub resource: Arc<Resource>,
    /// Resolved `destination_dir/name`.
    pub destination_path: PathBuf,
    /// Resolved `cache_dir/name`, when a cache is configured.
    pub cache_path: Option<PathBuf>,
    /// 0-indexed attempt number.
    pub attempt: u32,
}

impl FetchTask {
    /// The follow-up task for the next attempt.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Everything an attempt needs that stays fixed for the run.
#[derive(Debug)]
pub(crate) struct RunContext {
    pub(crate) writer: Arc<dyn ResourceWriter>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) storage: StoragePolicy,
    pub(crate) stats: Arc<FetchStats>,
}

/// Runs one attempt and turns its result into a queue outcome.
///
/// A failed attempt with retries left is handed back as a new task with
/// `attempt + 1`; the current task itself resolves without error.
#[instrument(level = "debug", skip_all, fields(name = %task.resource.name, attempt = task.attempt))]
pub(crate) async fn run_attempt(
    task: FetchTask,
    ctx: Arc<RunContext>,
) -> TaskOutcome<FetchTask, RunError> {
    let max_retries = ctx.retry_policy.max_retries();
    if ctx.retry_policy.is_exhausted(task.attempt) {
        ctx.stats.increment_failed();
        return TaskOutcome::Failed(RunError::RetryLimitExceeded {
            name: task.resource.name.clone(),
            max_retries,
            source: None,
        });
    }

    let error = match cache::fetch_or_skip(ctx.writer.as_ref(), &task, ctx.storage).await {
        Ok(resolution) => {
            ctx.stats.record(resolution);
            match resolution.origin {
                Origin::Network => info!(
                    name = %task.resource.name,
                    attempt = task.attempt,
                    "fetched"
                ),
                Origin::Cache | Origin::Existing => {
                    debug!(name = %task.resource.name, origin = ?resolution.origin, "no fetch needed");
                }
            }
            return TaskOutcome::Done;
        }
        Err(error) => error,
    };

    match ctx.retry_policy.should_retry(task.attempt) {
        RetryDecision::Retry { delay, attempt } => {
            warn!(
                name = %task.resource.name,
                attempt = task.attempt,
                next_attempt = attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "attempt failed, retrying"
            );
            ctx.stats.increment_retried();
            TaskOutcome::Requeue {
                task: task.next_attempt(),
                delay,
            }
        }
        RetryDecision::DoNotRetry { reason } => {
            warn!(
                name = %task.resource.name,
                attempt = task.attempt,
                reason = %reason,
                error = %error,
                "giving up on resource"
            );
            ctx.stats.increment_failed();
            TaskOutcome::Failed(RunError::RetryLimitExceeded {
                name: task.resource.name.clone(),
                max_retries,
                source: Some(Box::new(error)),
            })
        }
    }
}
