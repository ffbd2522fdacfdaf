//! TLS over Buffer Channels
//!
//! ```text
//!   socket bytes ──push_network──► net channel ──UNWRAP gate──► rustls
//!                                                  (whole records)   │
//!   read channel ◄──────────── decrypt scratch ◄──── plaintext ──────┘
//!
//!   send(plain) ──wrap──► rustls ──write_tls──► write channel ──► socket
//! ```
//!
//! `TlsParser` drives one rustls `Connection` with an explicit status
//! machine and a cumulative step cap. `TlsManager` builds the rustls
//! configs from PEM material and hands out parsers.

pub mod manager;
pub mod parser;

pub use manager::TlsManager;
pub use parser::{HandshakeProgress, HandshakeStatus, TlsParser};

/// Which end of the handshake a parser plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsSide {
    Client,
    Server,
}
