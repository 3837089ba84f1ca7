//! Cache resolver: decides where a resource is fetched to and whether it
//! needs fetching at all.
//!
//! With a cache directory the canonical copy lives at `cache_dir/name`; a
//! present file there is a cache hit and skips the network. The canonical file
//! is then copied to `destination_dir/name` (subject to [`CopyPolicy`]).
//! Without a cache the canonical location is the destination itself, and
//! incremental mode skips the fetch when a file is already there.

use std::path::Path;

use tracing::{debug, instrument, warn};

use super::client::ResourceWriter;
use super::engine::FetchTask;
use super::error::AttemptError;
use crate::config::CopyPolicy;
use crate::fs;
use crate::manifest::Resource;

/// Where the canonical file came from on a successful attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Downloaded during this attempt.
    Network,
    /// Already present in the cache directory.
    Cache,
    /// Already present at the destination (incremental skip).
    Existing,
}

/// Result of one successful pass through the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// How the canonical file was obtained.
    pub origin: Origin,
    /// Whether the canonical file was copied to the destination.
    pub copied: bool,
}

/// Storage decisions that stay fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoragePolicy {
    /// Skip the fetch when the destination already exists (direct mode only).
    pub incremental: bool,
    /// Cache-to-destination copy behaviour.
    pub copy_policy: CopyPolicy,
}

/// Runs the fetch-or-skip logic for one attempt of `task`.
///
/// # Errors
///
/// Returns [`AttemptError`] for any failure: download, chmod or copy.
#[instrument(level = "debug", skip_all, fields(name = %task.resource.name, attempt = task.attempt))]
pub async fn fetch_or_skip(
    writer: &dyn ResourceWriter,
    task: &FetchTask,
    policy: StoragePolicy,
) -> Result<Resolution, AttemptError> {
    let resource = task.resource.as_ref();
    let destination = task.destination_path.as_path();

    let Some(cache_path) = task.cache_path.as_deref() else {
        if policy.incremental && fs::exists(destination).await {
            debug!(path = %destination.display(), "destination exists; skipping fetch");
            return Ok(Resolution {
                origin: Origin::Existing,
                copied: false,
            });
        }
        fetch_into(writer, resource, destination).await?;
        return Ok(Resolution {
            origin: Origin::Network,
            copied: false,
        });
    };

    let origin = if fs::exists(cache_path).await {
        debug!(path = %cache_path.display(), "cache hit");
        Origin::Cache
    } else {
        fetch_into(writer, resource, cache_path).await?;
        Origin::Network
    };

    let copied = match policy.copy_policy {
        CopyPolicy::Always => true,
        CopyPolicy::IfMissing => !fs::exists(destination).await,
    };
    if copied {
        fs::copy_contents(cache_path, destination).await?;
        if let Some(mode) = resource.mode {
            fs::apply_mode(destination, mode).await?;
        }
    } else {
        debug!(path = %destination.display(), "destination exists; copy skipped");
    }

    Ok(Resolution { origin, copied })
}

/// Downloads `resource` to `path` and applies its mode.
///
/// A file whose mode could not be set is removed again, so a later attempt
/// fetches it afresh instead of finding it as a hit.
async fn fetch_into(
    writer: &dyn ResourceWriter,
    resource: &Resource,
    path: &Path,
) -> Result<(), AttemptError> {
    writer.write(path, &resource.source_url).await?;
    if let Some(mode) = resource.mode
        && let Err(error) = fs::apply_mode(path, mode).await
    {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to remove file after chmod error");
        }
        return Err(error.into());
    }
    Ok(())
}
