//! Fetcher Core Library
//!
//! A resilient, concurrency-bounded fetcher for named remote resources. The
//! caller supplies a mapping of resource name to source URL (and optional
//! file mode); every downloadable entry is fetched into a destination
//! directory, optionally through a shared cache, with bounded retries.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Run configuration and its validation
//! - [`download`] - Atomic downloads, cache resolution, retries, the run itself
//! - [`fs`] - Existence probing, content copies and permission bits
//! - [`manifest`] - The resource mapping exchanged with the caller

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod fs;
pub mod manifest;
#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use config::{BackoffConfig, ConfigError, CopyPolicy, FailurePolicy, RunConfiguration};
pub use download::{
    AttemptError, FetchError, FetchStats, Fetcher, HttpClient, ResourceWriter, RetryPolicy,
    RunError,
};
pub use fs::{FileSystemError, FsOperation};
pub use manifest::{Resource, ResourceEntry, ResourceMap, take_downloadable};
