//! # nbio - Non-blocking network engine
//!
//! Event-driven TCP with optional TLS, built on native buffers and
//! per-runner epoll selectors.
//!
//! ## Features
//!
//! - **Buffer Channels**: off-heap chunk chains with zero-copy borrow/commit
//! - **Event Runners**: one thread per runner, priority queue, round-robin groups
//! - **Reactor**: one epoll selector per IO runner, eventfd wakeups
//! - **TLS**: rustls state machine gated behind the handshake
//! - **Framing**: pluggable splitters plus a codec filter chain
//! - **Liveness**: idle events, read timeouts and an optional heartbeat
//!
//! ## Quick Start
//!
//! ```ignore
//! use nbio::{IoHandler, Message, NetConfig, Session, SocketContext, TcpServer};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl IoHandler for Echo {
//!     fn on_receive(&self, _s: &Arc<Session>, msg: Message) -> Option<Message> {
//!         Some(msg)
//!     }
//! }
//!
//! fn main() -> nbio::Result<()> {
//!     nbio::init_logging();
//!     let ctx = SocketContext::new(Echo).with_config(NetConfig::from_env());
//!     let server = TcpServer::bind("0.0.0.0:7000", ctx)?;
//!     std::thread::park();
//!     server.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Crate Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  nbio-net      TcpServer, TcpClient, Session, TLS, framing  │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │  nbio-runtime                │   │  nbio-buffer             │
//! │  EventRunner, RunnerGroup,   │   │  NativeBuffer,           │
//! │  TimerThread, notifiers      │   │  BufferChannel           │
//! └──────────────────────────────┘   └──────────────────────────┘
//!            │                                   │
//!            └─────────────────┬─────────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  nbio-core    errors, env config, logging, spin locks       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use nbio_core::{
    BufferError,
    BufferResult,
    ConfigError,
    NetError,
    Result,
    RunnerError,
    SessionFlags,
    TimeoutKind,
};

// Re-export logging macros
pub use nbio_core::{nprintln, nerror, nwarn, ninfo, ndebug, ntrace};
pub use nbio_core::log::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use nbio_core::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_size, env_get_str, env_is_set};

// Buffers
pub use nbio_buffer::{BufferChannel, MemorySnapshot, MemoryStats, NativeBuffer};

// Runners
pub use nbio_runtime::{priority, EventRunner, RunnerGroup, RuntimeConfig, TimerTask, TimerThread};

// Networking
pub use nbio_net::{
    ByteFilter,
    ByteFilterSplitter,
    DelimiterSplitter,
    FilterChain,
    FixedLengthSplitter,
    HeartBeatConfig,
    IoFilter,
    IoHandler,
    LengthField,
    LengthPrefixSplitter,
    LineSplitter,
    Message,
    MessageSplitter,
    NetConfig,
    Session,
    SessionEvent,
    SocketContext,
    StringFilter,
    SynchronousHandler,
    TcpClient,
    TcpServer,
    TlsManager,
    TransferSplitter,
};

// Whole crates, for anything not re-exported above
pub use nbio_buffer as buffer;
pub use nbio_net as net;
pub use nbio_runtime as runtime;
