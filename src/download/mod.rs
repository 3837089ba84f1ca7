//! Resource fetching: atomic downloads, cache resolution, retries and the
//! concurrency-bounded run.
//!
//! # Features
//!
//! - Streaming downloads into a temporary sibling, renamed on success
//! - Optional shared cache directory with cache-to-destination copy
//! - Incremental skip of already-present destination files
//! - Bounded retries, optionally with exponential backoff
//! - Configurable cap on simultaneously in-flight downloads
//!
//! # Example
//!
//! ```no_run
//! use fetcher_core::download::HttpClient;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let bytes = client
//!     .download_to_path("https://example.com/logo.png", Path::new("./public/logo.png"))
//!     .await?;
//! println!("wrote {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
pub(crate) mod constants;
mod engine;
mod error;
mod queue;
mod retry;

pub use cache::{Origin, Resolution, StoragePolicy, fetch_or_skip};
pub use client::{ClientTimeouts, HttpClient, ResourceWriter};
pub use engine::{FetchStats, FetchTask, Fetcher, RunError};
pub use error::{AttemptError, FetchError};
pub use retry::{Backoff, DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy};

// We do NOT define module-local Result aliases.
// Use `Result<T, FetchError>` explicitly in function signatures.
