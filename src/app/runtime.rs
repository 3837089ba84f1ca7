use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fetcher_core::{Fetcher, ResourceMap, RunConfiguration};
use tracing::{debug, error, info};

use crate::ProcessExit;
use crate::app::exit_handler;
use crate::app_config;
use crate::cli::Args;

/// Everything resolved before the first request goes out.
#[derive(Debug)]
pub(crate) struct RunPlan {
    pub(crate) config: RunConfiguration,
    pub(crate) resources: ResourceMap,
    pub(crate) remaining: Option<PathBuf>,
}

/// Loads configuration and the manifest.
///
/// Any error here is a usage error: nothing has been fetched yet.
pub(crate) fn prepare(args: &Args) -> Result<RunPlan> {
    let loaded = app_config::load_file_config(args.config.as_deref())?;
    debug!(
        path = ?loaded.path,
        loaded_from_file = loaded.config.is_some(),
        "config resolved"
    );
    let config = app_config::build_run_configuration(args, loaded.config.as_ref())?;
    let resources = read_manifest(&args.manifest)?;
    debug!(?config, entries = resources.len(), "run planned");

    Ok(RunPlan {
        config,
        resources,
        remaining: args.remaining.clone(),
    })
}

/// Runs the fetch and writes the leftover entries.
pub(crate) async fn execute(plan: RunPlan) -> Result<ProcessExit> {
    let RunPlan {
        config,
        mut resources,
        remaining,
    } = plan;

    let result = match Fetcher::new(config) {
        Ok(fetcher) => fetcher.fetch_all(&mut resources).await,
        Err(err) => Err(err),
    };

    if let Some(path) = remaining.as_deref() {
        write_remaining(path, &resources)?;
        debug!(path = %path.display(), entries = resources.len(), "remaining entries written");
    }

    match &result {
        Ok(stats) => info!(
            completed = stats.completed(),
            downloaded = stats.downloaded(),
            cache_hits = stats.cache_hits(),
            skipped = stats.skipped(),
            "Fetch complete"
        ),
        Err(err) => error!("{}", error_chain(err)),
    }

    Ok(exit_handler::determine_exit_outcome(&result))
}

fn read_manifest(path: &Path) -> Result<ResourceMap> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse manifest '{}'", path.display()))
}

fn write_remaining(path: &Path, resources: &ResourceMap) -> Result<()> {
    let json = serde_json::to_string_pretty(resources)?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write remaining entries to '{}'", path.display()))
}

/// `outer: inner: root` rendering of an error and its sources.
fn error_chain(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
