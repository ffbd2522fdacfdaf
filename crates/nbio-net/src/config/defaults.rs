//! Library defaults for `NetConfig`
//!
//! Environment variables override these at `from_env()` time. Thread
//! counts and the checker tick live in `nbio_runtime::config::defaults`.

use nbio_core::constants;

/// Socket read scratch size and initial channel capacity
pub const BUFFER_SIZE: usize = constants::DEFAULT_BUFFER_SIZE;

/// Upper bound for one session channel
pub const CHANNEL_MAX_SIZE: usize = constants::DEFAULT_MAX_CHANNEL_SIZE;

/// Bounded selector wait when the runner has nothing queued
pub const SELECT_INTERVAL_MS: u64 = 20;

/// Close a connected session after this long without inbound bytes (0 = off)
pub const READ_TIMEOUT_MS: u64 = 0;

/// Give up on a flush that cannot make progress for this long
pub const SEND_TIMEOUT_MS: u64 = 5000;

/// Fire `Idle` after this long without activity (0 = off)
pub const IDLE_INTERVAL_MS: u64 = 0;

pub const ASYNC_SEND: bool = false;
pub const ASYNC_RECEIVE: bool = false;

/// Cumulative TLS handshake step cap
pub const HANDSHAKE_MAX_STEPS: u32 = 64;

/// Consecutive zero-byte readiness events before the session is closed
pub const MAX_EMPTY_READS: u32 = 64;

/// TCP connect bound, also the TLS handshake bound
pub const CONNECT_TIMEOUT_MS: u64 = 5000;

/// listen(2) backlog
pub const LISTEN_BACKLOG: i32 = 1024;
