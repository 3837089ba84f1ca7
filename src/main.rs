//! CLI entry point for the fetcher tool.

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, info};

mod app;
mod app_config;
mod cli;

use app::{runtime, terminal};
use cli::Args;

/// Process outcome, mapped onto the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every downloadable resource was fetched.
    Success,
    /// A resource failed terminally.
    Failure,
    /// Bad configuration, manifest or arguments; nothing was fetched.
    Usage,
}

impl ProcessExit {
    fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::Failure => ExitCode::from(1),
            Self::Usage => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let no_color = terminal::should_disable_color(
        args.no_color,
        terminal::no_color_env_requested(),
        terminal::is_dumb_terminal(),
    );
    terminal::init_tracing(terminal::default_log_level(args.quiet, args.verbose), no_color);

    debug!(?args, "CLI arguments parsed");
    info!("Fetcher starting");

    let plan = match runtime::prepare(&args) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ProcessExit::Usage.exit_code();
        }
    };

    match runtime::execute(plan).await {
        Ok(exit) => exit.exit_code(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ProcessExit::Failure.exit_code()
        }
    }
}
