//! Constants for the download module (timeouts, limits).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Upper bound for any configured timeout, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Upper bound for configured retries.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Upper bound for an explicit concurrency cap.
pub const MAX_CONCURRENCY: usize = 256;
