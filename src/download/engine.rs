//! Fetch orchestrator: turns a resource mapping into a bounded, retried run.
//!
//! [`Fetcher`] removes every downloadable entry from the caller's
//! [`ResourceMap`], resolves its destination (and cache) path, and drains one
//! attempt-0 [`FetchTask`] per resource through the concurrency queue.
//! Failed attempts are requeued until the retry budget is spent; the first
//! terminal failure becomes the run result.
//!
//! # Example
//!
//! ```no_run
//! use fetcher_core::{Fetcher, ResourceEntry, ResourceMap, RunConfiguration};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut resources = ResourceMap::new();
//! resources.insert("a.txt".into(), ResourceEntry::remote("https://example.com/a.txt"));
//! resources.insert(
//!     "bin/tool".into(),
//!     ResourceEntry::remote("https://example.com/tool").with_mode(0o755),
//! );
//!
//! let config = RunConfiguration::new("./public")
//!     .with_max_retries(2)
//!     .with_max_concurrency(Some(4));
//! let fetcher = Fetcher::new(config)?;
//! let stats = fetcher.fetch_all(&mut resources).await?;
//! println!("downloaded {}, cache hits {}", stats.downloaded(), stats.cache_hits());
//! # Ok(())
//! # }
//! ```

mod task;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{info, instrument, warn};

pub use task::FetchTask;
use task::{RunContext, run_attempt};

use super::cache::{Origin, Resolution, StoragePolicy};
use super::client::{HttpClient, ResourceWriter};
use super::error::AttemptError;
use super::queue::ConcurrencyQueue;
use crate::config::{ConfigError, FailurePolicy, RunConfiguration};
use crate::fs::{self, FileSystemError};
use crate::manifest::{Resource, ResourceMap, take_downloadable};

/// Fatal outcome of a fetch run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A resource failed on every allowed attempt.
    #[error("resource '{name}' failed after exhausting {max_retries} retries")]
    RetryLimitExceeded {
        /// Resource name.
        name: String,
        /// Configured retry maximum.
        max_retries: u32,
        /// Error from the last attempt, when one ran.
        #[source]
        source: Option<Box<AttemptError>>,
    },

    /// The configuration did not validate.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// A resource name cannot be resolved under the output directories.
    #[error(transparent)]
    InvalidResourceName(FileSystemError),

    /// A fetch task panicked.
    #[error("fetch task panicked: {message}")]
    TaskPanicked {
        /// Panic description.
        message: String,
    },
}

impl From<JoinError> for RunError {
    fn from(error: JoinError) -> Self {
        Self::TaskPanicked {
            message: error.to_string(),
        }
    }
}

/// Counters for one [`Fetcher::fetch_all`] run.
///
/// Updated concurrently by the attempt tasks; read once the run has drained.
#[derive(Debug, Default)]
pub struct FetchStats {
    downloaded: AtomicUsize,
    cache_hits: AtomicUsize,
    skipped: AtomicUsize,
    copied: AtomicUsize,
    retried: AtomicUsize,
    failed: AtomicUsize,
}

impl FetchStats {
    /// Creates a tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources downloaded over the network.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Resources served from the cache directory.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::SeqCst)
    }

    /// Resources skipped because the destination already existed.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Cache-to-destination copies made.
    #[must_use]
    pub fn copied(&self) -> usize {
        self.copied.load(Ordering::SeqCst)
    }

    /// Failed attempts that were retried.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Resources that failed terminally.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Resources that ended up satisfied (downloaded, cache hit or skipped).
    #[must_use]
    pub fn completed(&self) -> usize {
        self.downloaded() + self.cache_hits() + self.skipped()
    }

    fn record(&self, resolution: Resolution) {
        let counter = match resolution.origin {
            Origin::Network => &self.downloaded,
            Origin::Cache => &self.cache_hits,
            Origin::Existing => &self.skipped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        if resolution.copied {
            self.copied.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Self {
        let copy = |counter: &AtomicUsize| AtomicUsize::new(counter.load(Ordering::SeqCst));
        Self {
            downloaded: copy(&self.downloaded),
            cache_hits: copy(&self.cache_hits),
            skipped: copy(&self.skipped),
            copied: copy(&self.copied),
            retried: copy(&self.retried),
            failed: copy(&self.failed),
        }
    }
}

/// Concurrency-bounded resource fetcher.
///
/// Holds the validated [`RunConfiguration`] and the [`ResourceWriter`] used
/// for every download. One `Fetcher` can serve several runs; each
/// [`fetch_all`](Self::fetch_all) call gets its own queue and counters.
#[derive(Debug)]
pub struct Fetcher {
    config: RunConfiguration,
    writer: Arc<dyn ResourceWriter>,
}

impl Fetcher {
    /// Creates a fetcher that downloads with an [`HttpClient`] built from
    /// the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::InvalidConfig`] if validation fails, or
    /// [`RunError::HttpClient`] if the client cannot be built.
    pub fn new(config: RunConfiguration) -> Result<Self, RunError> {
        config.validate()?;
        let client =
            HttpClient::with_timeouts(config.client_timeouts()).map_err(RunError::HttpClient)?;
        Ok(Self {
            config,
            writer: Arc::new(client),
        })
    }

    /// Creates a fetcher that downloads through `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::InvalidConfig`] if validation fails.
    pub fn with_writer(
        config: RunConfiguration,
        writer: Arc<dyn ResourceWriter>,
    ) -> Result<Self, RunError> {
        config.validate()?;
        Ok(Self { config, writer })
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Fetches every downloadable entry of `resources`.
    ///
    /// Downloadable entries (those with a `contentsUrl`) are removed from
    /// `resources` before anything is fetched, whatever the outcome. Entries
    /// without one are left untouched.
    ///
    /// # Errors
    ///
    /// Returns the first terminal failure, normally
    /// [`RunError::RetryLimitExceeded`]. A resource name that escapes the
    /// output directories fails that resource with
    /// [`RunError::InvalidResourceName`]; under [`FailurePolicy::Drain`] the
    /// other resources are still fetched and the name error is returned
    /// afterwards, under [`FailurePolicy::Abort`] nothing is fetched.
    #[instrument(skip_all, fields(destination = %self.config.destination_dir().display()))]
    pub async fn fetch_all(&self, resources: &mut ResourceMap) -> Result<FetchStats, RunError> {
        let downloadable = take_downloadable(resources);
        info!(
            resources = downloadable.len(),
            left_for_caller = resources.len(),
            "starting fetch run"
        );

        let stats = Arc::new(FetchStats::new());
        let mut tasks = Vec::with_capacity(downloadable.len());
        let mut rejected = None;
        for resource in downloadable {
            match self.plan_task(resource) {
                Ok(task) => tasks.push(task),
                Err(error) => {
                    warn!(error = %error, "rejecting resource with unusable name");
                    stats.increment_failed();
                    if self.config.failure_policy == FailurePolicy::Abort {
                        return Err(RunError::InvalidResourceName(error));
                    }
                    if rejected.is_none() {
                        rejected = Some(RunError::InvalidResourceName(error));
                    }
                }
            }
        }

        let ctx = Arc::new(RunContext {
            writer: Arc::clone(&self.writer),
            retry_policy: self.config.retry_policy(),
            storage: StoragePolicy {
                incremental: self.config.incremental,
                copy_policy: self.config.copy_policy,
            },
            stats: Arc::clone(&stats),
        });

        let queue = ConcurrencyQueue::new(self.config.max_concurrency, self.config.failure_policy);
        let result = queue
            .drain(tasks, |task| run_attempt(task, Arc::clone(&ctx)))
            .await;

        info!(
            downloaded = stats.downloaded(),
            cache_hits = stats.cache_hits(),
            skipped = stats.skipped(),
            copied = stats.copied(),
            retried = stats.retried(),
            failed = stats.failed(),
            "fetch run finished"
        );

        if let Some(error) = rejected {
            return Err(error);
        }
        result?;
        drop(ctx);
        Ok(Arc::try_unwrap(stats).unwrap_or_else(|shared| shared.snapshot()))
    }

    fn plan_task(&self, resource: Resource) -> Result<FetchTask, FileSystemError> {
        let destination_path = fs::resolve_under(self.config.destination_dir(), &resource.name)?;
        let cache_path = self
            .config
            .cache_dir()
            .map(|dir| fs::resolve_under(dir, &resource.name))
            .transpose()?;
        Ok(FetchTask {
            resource: Arc::new(resource),
            destination_path,
            cache_path,
            attempt: 0,
        })
    }
}
