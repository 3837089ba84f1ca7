//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use fetcher_core::CopyPolicy;

/// Fetch the remote resources listed in a manifest.
///
/// The manifest is a JSON object mapping resource names to entries. Entries
/// with a `contentsUrl` are downloaded into the destination directory; the
/// rest are left alone and can be written back out with `--remaining`.
#[derive(Parser, Debug)]
#[command(name = "fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the JSON resource manifest
    pub manifest: PathBuf,

    /// Destination directory (default: config file value, then ".")
    #[arg(short = 'd', long)]
    pub dest: Option<PathBuf>,

    /// Shared cache directory; resources are fetched here and copied to the destination
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Skip resources whose destination file already exists (no cache only)
    #[arg(short = 'i', long, overrides_with = "no_incremental")]
    pub incremental: bool,

    /// Refetch existing destination files even if the config file enables incremental mode
    #[arg(long, overrides_with = "incremental")]
    pub no_incremental: bool,

    /// Retries per resource after the first attempt (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub max_retries: Option<u32>,

    /// Maximum concurrent downloads (1-256, default unbounded)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub concurrency: Option<u16>,

    /// Whether a cache hit overwrites an existing destination file
    #[arg(long, value_enum)]
    pub copy_policy: Option<CopyPolicyArg>,

    /// Cancel the remaining downloads as soon as one resource fails
    #[arg(long)]
    pub abort_on_failure: bool,

    /// Per-attempt timeout in seconds (1-3600)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Config file (default: $XDG_CONFIG_HOME/fetcher/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the entries left for the caller (no `contentsUrl`) to this JSON file
    #[arg(long)]
    pub remaining: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored log output
    #[arg(long)]
    pub no_color: bool,
}

/// Command-line spelling of [`CopyPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CopyPolicyArg {
    /// Always copy from the cache
    Always,
    /// Keep an existing destination file
    IfMissing,
}

impl From<CopyPolicyArg> for CopyPolicy {
    fn from(value: CopyPolicyArg) -> Self {
        match value {
            CopyPolicyArg::Always => Self::Always,
            CopyPolicyArg::IfMissing => Self::IfMissing,
        }
    }
}
