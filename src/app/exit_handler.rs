//! Exit code logic for the fetcher process.
//!
//! Single responsibility: map a run result to the process exit outcome.

use fetcher_core::{FetchStats, RunError};

use crate::ProcessExit;

/// Determines the process exit outcome from the run result.
///
/// Configuration problems count as usage errors; every other run error is a
/// failure.
pub(crate) fn determine_exit_outcome(result: &Result<FetchStats, RunError>) -> ProcessExit {
    match result {
        Ok(_) => ProcessExit::Success,
        Err(RunError::InvalidConfig(_) | RunError::InvalidResourceName(_)) => ProcessExit::Usage,
        Err(_) => ProcessExit::Failure,
    }
}
