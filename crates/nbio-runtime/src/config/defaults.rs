//! Library defaults for `RuntimeConfig`
//!
//! Environment variables override these at `from_env()` time.

/// Runners accepting connections
pub const ACCEPT_THREADS: usize = 1;

/// Runners doing session I/O; 0 means "CPU count"
pub const IO_THREADS: usize = 0;

/// Idle runner park time when no selector is attached
pub const PARK_TIMEOUT_MS: u64 = 10;

/// Timer thread tick
pub const CHECK_INTERVAL_MS: u64 = 100;

/// Native memory report period; 0 disables
pub const MEMORY_REPORT_MS: u64 = 0;

/// Thread name prefix (`nbio-io-0`, `nbio-accept-0`, `nbio-timer`)
pub const THREAD_NAME_PREFIX: &str = "nbio";
