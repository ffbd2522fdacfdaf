//! Per-server (or per-client) wiring
//!
//! A `SocketContext` is built once, wrapped in an `Arc` by `TcpServer` or
//! `TcpClient`, and shared by every session it creates.
//!
//! ```rust,ignore
//! let ctx = SocketContext::new(EchoHandler)
//!     .with_config(NetConfig::from_env().io_threads(4))
//!     .with_splitter(LineSplitter)
//!     .with_filter(StringFilter)
//!     .with_tls(TlsManager::server_from_files("cert.pem", "key.pem")?);
//! ```

use crate::config::NetConfig;
use crate::filter::{FilterChain, IoFilter};
use crate::handler::IoHandler;
use crate::heartbeat::HeartBeatConfig;
use crate::session::Session;
use crate::splitter::{MessageSplitter, TransferSplitter};
use crate::tls::TlsManager;

use nbio_core::sync::SpinLock;

use std::fmt;
use std::sync::{Arc, Weak};

/// Handler, filters, splitter, config and TLS for a group of sessions
pub struct SocketContext {
    config: NetConfig,
    handler: Arc<dyn IoHandler>,
    filters: FilterChain,
    splitter: Arc<dyn MessageSplitter>,
    tls: Option<Arc<TlsManager>>,
    heartbeat: Option<HeartBeatConfig>,
    pub(crate) sessions: SessionSet,
}

impl SocketContext {
    /// Context with env-derived config, no filters and a `TransferSplitter`
    pub fn new<H: IoHandler + 'static>(handler: H) -> Self {
        Self::with_handler(Arc::new(handler))
    }

    pub fn with_handler(handler: Arc<dyn IoHandler>) -> Self {
        Self {
            config: NetConfig::from_env(),
            handler,
            filters: FilterChain::new(),
            splitter: Arc::new(TransferSplitter),
            tls: None,
            heartbeat: None,
            sessions: SessionSet::default(),
        }
    }

    pub fn with_config(mut self, config: NetConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a filter; decode order is insertion order
    pub fn with_filter<F: IoFilter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_splitter<S: MessageSplitter + 'static>(mut self, splitter: S) -> Self {
        self.splitter = Arc::new(splitter);
        self
    }

    pub fn with_tls(mut self, tls: TlsManager) -> Self {
        self.tls = Some(Arc::new(tls));
        self
    }

    /// Enable PING/PONG keepalive on idle events (needs `idle_interval`)
    pub fn with_heartbeat(mut self, heartbeat: HeartBeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn IoHandler> {
        &self.handler
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn splitter(&self) -> &Arc<dyn MessageSplitter> {
        &self.splitter
    }

    pub fn tls(&self) -> Option<&Arc<TlsManager>> {
        self.tls.as_ref()
    }

    pub fn heartbeat(&self) -> Option<&HeartBeatConfig> {
        self.heartbeat.as_ref()
    }

    /// Open sessions created through this context
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Open sessions, oldest first
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.snapshot()
    }
}

impl fmt::Debug for SocketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketContext")
            .field("filters", &self.filters)
            .field("tls", &self.tls.is_some())
            .field("heartbeat", &self.heartbeat.is_some())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

// ============================================================================
// Session registry
// ============================================================================

/// Weak list of sessions, walked by the idle checker and by shutdown
#[derive(Default)]
pub(crate) struct SessionSet {
    entries: SpinLock<Vec<Weak<Session>>>,
}

impl SessionSet {
    pub(crate) fn add(&self, session: &Arc<Session>) {
        self.entries.lock().push(Arc::downgrade(session));
    }

    /// Live, unclosed sessions; dead entries are pruned on the way
    pub(crate) fn snapshot(&self) -> Vec<Arc<Session>> {
        let mut entries = self.entries.lock();
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|w| match w.upgrade() {
            Some(s) if !s.is_closed() => {
                live.push(s);
                true
            }
            _ => false,
        });
        live
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }
}
