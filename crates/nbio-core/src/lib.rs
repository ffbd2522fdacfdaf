//! # nbio-core
//!
//! Core types shared by every nbio crate.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Native memory lives in `nbio-buffer`, threads in `nbio-runtime` and
//! sockets in `nbio-net`.
//!
//! ## Modules
//!
//! - `error` - Error taxonomy (buffer, runner, config, session)
//! - `env` - Environment variable utilities
//! - `log` - Kernel-style stderr logging macros
//! - `sync` - Spin lock and reentrant lock primitives
//! - `state` - Atomic session state flags

pub mod error;
pub mod env;
pub mod log;
pub mod sync;
pub mod state;

pub use error::{BufferError, BufferResult, ConfigError, NetError, Result, RunnerError, TimeoutKind};
pub use env::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_size, env_get_str, env_is_set};
pub use state::SessionFlags;
pub use sync::{ReentrantLock, ReentrantGuard, SpinLock, SpinLockGuard};

/// Shared constants
pub mod constants {
    /// Default socket read/send buffer and initial channel capacity (8 KB)
    pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

    /// Default upper bound for a single Buffer Channel (2 MB)
    pub const DEFAULT_MAX_CHANNEL_SIZE: usize = 2 * 1024 * 1024;

    /// TLS record header: content type (1) + version (2) + length (2)
    pub const TLS_RECORD_HEADER_LEN: usize = 5;

    /// Largest TLS ciphertext fragment a peer may legally send (2^14 + 2048)
    pub const TLS_MAX_RECORD_PAYLOAD: usize = 16384 + 2048;

    /// Lowest (least urgent) runner task priority
    pub const PRIORITY_MIN: u8 = 1;

    /// Highest (most urgent) runner task priority
    pub const PRIORITY_MAX: u8 = 10;
}
