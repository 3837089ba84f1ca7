//! Application configuration loading for CLI defaults.
//!
//! Values come from a TOML file; anything given on the command line wins.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fetcher_core::{BackoffConfig, CopyPolicy, FailurePolicy, RunConfiguration};
use serde::Deserialize;

use crate::cli::Args;

/// TOML-backed file configuration for fetcher defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Default destination directory.
    pub destination_dir: Option<PathBuf>,
    /// Default shared cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Default incremental mode.
    pub incremental: Option<bool>,
    /// Default retries per resource (0..=10).
    pub max_retries: Option<u32>,
    /// Default concurrency cap (1..=256).
    pub max_concurrency: Option<usize>,
    /// Default cache copy policy.
    pub copy_policy: Option<CopyPolicy>,
    /// Default failure policy.
    pub failure_policy: Option<FailurePolicy>,
    /// Optional per-attempt timeout in seconds.
    pub attempt_timeout_secs: Option<u64>,
    /// Optional HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Optional HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Optional exponential backoff between retries.
    pub backoff: Option<BackoffConfig>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        self.apply_to(RunConfiguration::default())
            .validate()
            .context("Invalid config value")?;
        Ok(())
    }

    /// Overlays every value present in the file onto `config`.
    #[must_use]
    pub fn apply_to(&self, mut config: RunConfiguration) -> RunConfiguration {
        if let Some(dir) = &self.destination_dir {
            config.destination_dir.clone_from(dir);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if let Some(incremental) = self.incremental {
            config.incremental = incremental;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if self.max_concurrency.is_some() {
            config.max_concurrency = self.max_concurrency;
        }
        if let Some(copy_policy) = self.copy_policy {
            config.copy_policy = copy_policy;
        }
        if let Some(failure_policy) = self.failure_policy {
            config.failure_policy = failure_policy;
        }
        if self.attempt_timeout_secs.is_some() {
            config.attempt_timeout_secs = self.attempt_timeout_secs;
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = self.read_timeout_secs {
            config.read_timeout_secs = secs;
        }
        if self.backoff.is_some() {
            config.backoff = self.backoff;
        }
        config
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/fetcher/config.toml`
/// 2. `$HOME/.config/fetcher/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("fetcher")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("fetcher")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` (which must exist) or from the default path
/// if a file is present there.
pub fn load_file_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        if !path.is_file() {
            bail!("Config file '{}' does not exist", path.display());
        }
        let config = read_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path) if path.is_file() => Some(read_file_config(path)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Builds the run configuration: defaults, then file values, then CLI values.
pub fn build_run_configuration(
    args: &Args,
    file: Option<&FileConfig>,
) -> Result<RunConfiguration> {
    let mut config = match file {
        Some(file) => file.apply_to(RunConfiguration::default()),
        None => RunConfiguration::default(),
    };

    if let Some(dest) = &args.dest {
        config.destination_dir.clone_from(dest);
    }
    if let Some(cache) = &args.cache {
        config.cache_dir = Some(cache.clone());
    }
    if args.incremental {
        config.incremental = true;
    } else if args.no_incremental {
        config.incremental = false;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = Some(usize::from(concurrency));
    }
    if let Some(copy_policy) = args.copy_policy {
        config.copy_policy = copy_policy.into();
    }
    if args.abort_on_failure {
        config.failure_policy = FailurePolicy::Abort;
    }
    if args.timeout.is_some() {
        config.attempt_timeout_secs = args.timeout;
    }

    config
        .validate()
        .context("Invalid run configuration")?;
    Ok(config)
}
