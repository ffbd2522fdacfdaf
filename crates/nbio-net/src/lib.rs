//! # nbio-net - Reactor, sessions, TLS and framing
//!
//! The socket half of nbio. Connections are sharded across event runners,
//! each with its own epoll selector, and never migrate.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  IoHandler (application)                                     │
//! │    on_connect / on_receive / on_sent / on_idle / ...         │
//! └───────────────▲──────────────────────────────┬───────────────┘
//!                 │ Message                      │ reply Message
//! ┌───────────────┴──────────────────────────────▼───────────────┐
//! │  FilterChain  decode head→tail        encode tail→head       │
//! └───────────────▲──────────────────────────────┬───────────────┘
//!                 │ frame                        │ bytes
//! ┌───────────────┴───────────────┐  ┌───────────▼───────────────┐
//! │  MessageLoader + Splitter     │  │  Session::send / flush    │
//! │  (read channel, borrowed)     │  │  (write channel)          │
//! └───────────────▲───────────────┘  └───────────┬───────────────┘
//!                 │ plaintext                    │
//! ┌───────────────┴──────────────────────────────▼───────────────┐
//! │  TlsParser (optional): UNWRAP gate / wrap                    │
//! └───────────────▲──────────────────────────────┬───────────────┘
//! ┌───────────────┴──────────────────────────────▼───────────────┐
//! │  Selector (epoll, one per runner)     non-blocking socket    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use nbio_net::{IoHandler, Message, Session, SocketContext, TcpServer};
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
//! let server = TcpServer::bind("0.0.0.0:7000", SocketContext::new(Echo))?;
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Events through the runner queue**: handler callbacks are enum
//!    events queued at `priority::EVENT` on the owning runner, so a
//!    session's callbacks never run concurrently.
//! 2. **Direct writes**: sessions write to the socket themselves with a
//!    bounded retry loop; the selector only watches read readiness.
//! 3. **End-of-stream is the disconnect signal**: a zero-byte read,
//!    ECONNRESET/EPIPE or a hang-up. Payload bytes are never inspected
//!    for close markers.
//! 4. **Bounded TLS handshakes**: the step count is capped per session
//!    (`handshake_max_steps`) and the whole handshake by `connect_timeout`.

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("nbio-net requires epoll (Linux or Android)");

pub mod client;
pub mod config;
pub mod context;
pub mod event;
pub mod filter;
pub mod handler;
pub mod heartbeat;
pub mod idle;
pub mod loader;
pub mod message;
pub mod selector;
pub mod server;
pub mod session;
pub mod socket;
pub mod splitter;
pub mod tls;

#[cfg(test)]
mod testutil;

pub use client::TcpClient;
pub use config::NetConfig;
pub use context::SocketContext;
pub use filter::{ByteFilter, FilterChain, IoFilter, StringFilter};
pub use handler::{IoHandler, SessionEvent, SynchronousHandler};
pub use heartbeat::{HeartBeat, HeartBeatConfig};
pub use idle::{IdleChecker, MemoryReporter};
pub use loader::{MessageLoader, StopReason};
pub use message::Message;
pub use selector::Selector;
pub use server::TcpServer;
pub use session::Session;
pub use splitter::{
    ByteFilterSplitter, DelimiterSplitter, FixedLengthSplitter, LengthField, LengthPrefixSplitter,
    LineSplitter, MessageSplitter, TransferSplitter,
};
pub use tls::{HandshakeProgress, HandshakeStatus, TlsManager, TlsParser, TlsSide};
