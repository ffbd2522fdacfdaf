//! Error types for nbio
//!
//! Three layers, each with its own enum:
//!
//! - `BufferError` - native memory and Buffer Channel operations
//! - `RunnerError` / `ConfigError` - runtime setup and task submission
//! - `NetError` - session-level failures funneled to `on_exception`
//!
//! Buffer and runner errors convert into `NetError` so the session layer
//! can use `?` throughout.

use core::fmt;
use std::io;

/// Result type for session-level operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Result type for buffer operations
pub type BufferResult<T> = std::result::Result<T, BufferError>;

// ============================================================================
// Buffer errors
// ============================================================================

/// Errors from the Native Buffer Primitive and the Buffer Channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Operation on a released allocation or channel
    Released,

    /// Growth would exceed the channel's max size
    TooLarge { requested: usize, max_size: usize },

    /// Channel is currently borrowed through a guard
    Borrowed,

    /// Offset/length outside the valid region
    OutOfBounds { offset: usize, len: usize, size: usize },

    /// The allocator returned null
    AllocationFailed(usize),

    /// File or stream I/O while draining a channel
    Io(io::ErrorKind, String),

    /// Unsynchronized channel used off the thread that first touched it
    WrongThread,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Released => write!(f, "buffer released"),
            BufferError::TooLarge { requested, max_size } => write!(
                f,
                "buffer too large: {} bytes requested, max size {}",
                requested, max_size
            ),
            BufferError::Borrowed => write!(f, "buffer is borrowed"),
            BufferError::OutOfBounds { offset, len, size } => write!(
                f,
                "range {}..{} out of bounds for size {}",
                offset,
                offset + len,
                size
            ),
            BufferError::AllocationFailed(n) => write!(f, "allocation of {} bytes failed", n),
            BufferError::Io(kind, msg) => write!(f, "buffer io error ({:?}): {}", kind, msg),
            BufferError::WrongThread => write!(f, "buffer used off its owner thread"),
        }
    }
}

impl std::error::Error for BufferError {}

impl From<io::Error> for BufferError {
    fn from(e: io::Error) -> Self {
        BufferError::Io(e.kind(), e.to_string())
    }
}

impl From<BufferError> for io::Error {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Io(kind, msg) => io::Error::new(kind, msg),
            BufferError::TooLarge { .. } => io::Error::new(io::ErrorKind::OutOfMemory, e.to_string()),
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

// ============================================================================
// Runtime errors
// ============================================================================

/// Event runner errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// Priority outside 1..=10
    InvalidPriority(u8),

    /// Runner no longer accepts tasks
    ShutDown,

    /// Failed to spawn the runner thread
    SpawnFailed(String),

    /// OS error with errno
    Os(i32),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::InvalidPriority(p) => {
                write!(f, "invalid task priority {} (expected 1..=10)", p)
            }
            RunnerError::ShutDown => write!(f, "event runner is shut down"),
            RunnerError::SpawnFailed(msg) => write!(f, "failed to spawn runner thread: {}", msg),
            RunnerError::Os(errno) => write!(f, "OS error: errno {}", errno),
        }
    }
}

impl std::error::Error for RunnerError {}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { field, reason } => write!(f, "invalid {}: {}", field, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Session errors
// ============================================================================

/// Which bound was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Read,
    Send,
    Handshake,
    Connect,
    /// Too many consecutive zero-byte reads
    EmptyRead,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutKind::Read => "read",
            TimeoutKind::Send => "send",
            TimeoutKind::Handshake => "handshake",
            TimeoutKind::Connect => "connect",
            TimeoutKind::EmptyRead => "empty read",
        };
        f.write_str(s)
    }
}

/// Session-level errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// Growth would exceed a channel's max size
    Capacity { requested: usize, max_size: usize },

    /// Operation on a released channel or a closed session
    Released,

    /// Malformed TLS record, framing violation, handshake failure
    Protocol(String),

    /// A configured time bound was exceeded
    Timeout(TimeoutKind),

    /// Non-transient socket I/O error
    Io(io::ErrorKind, String),

    /// Task submission failed
    Runner(RunnerError),

    /// Bad configuration
    Config(ConfigError),
}

impl NetError {
    /// Create a protocol error from anything displayable
    pub fn protocol(msg: impl fmt::Display) -> Self {
        NetError::Protocol(msg.to_string())
    }

    /// Would-block and interrupted are retried internally
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetError::Io(io::ErrorKind::WouldBlock, _) | NetError::Io(io::ErrorKind::Interrupted, _)
        )
    }

    /// Peer went away: close quietly instead of raising an exception event
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            NetError::Io(io::ErrorKind::ConnectionReset, _)
                | NetError::Io(io::ErrorKind::ConnectionAborted, _)
                | NetError::Io(io::ErrorKind::BrokenPipe, _)
                | NetError::Io(io::ErrorKind::UnexpectedEof, _)
        )
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Capacity { requested, max_size } => write!(
                f,
                "capacity exceeded: {} bytes requested, max size {}",
                requested, max_size
            ),
            NetError::Released => write!(f, "resource released"),
            NetError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            NetError::Timeout(kind) => write!(f, "{} timeout", kind),
            NetError::Io(kind, msg) => write!(f, "io error ({:?}): {}", kind, msg),
            NetError::Runner(e) => write!(f, "runner error: {}", e),
            NetError::Config(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for NetError {}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        NetError::Io(e.kind(), e.to_string())
    }
}

impl From<BufferError> for NetError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Released => NetError::Released,
            BufferError::TooLarge { requested, max_size } => {
                NetError::Capacity { requested, max_size }
            }
            BufferError::AllocationFailed(n) => NetError::Capacity {
                requested: n,
                max_size: 0,
            },
            BufferError::Io(kind, msg) => NetError::Io(kind, msg),
            other => NetError::Protocol(other.to_string()),
        }
    }
}

impl From<RunnerError> for NetError {
    fn from(e: RunnerError) -> Self {
        NetError::Runner(e)
    }
}

impl From<ConfigError> for NetError {
    fn from(e: ConfigError) -> Self {
        NetError::Config(e)
    }
}

// ============================================================================
// Tests
// ============================================================================
