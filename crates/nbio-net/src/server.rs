//! TCP server
//!
//! ```text
//!   accept group (accept_threads)          IO group (io_threads)
//!   ┌──────────────────────────┐  choose   ┌─────────────────────────┐
//!   │ runner: selector+listener├──────────►│ runner: selector        │
//!   │ runner: selector+listener│ REGISTER  │ runner: selector  ...   │
//!   └──────────────────────────┘           └─────────────────────────┘
//!                        timer thread: IdleChecker (+ MemoryReporter)
//! ```
//!
//! With more than one accept runner, each binds its own listener with
//! `SO_REUSEPORT` and the kernel spreads incoming connections.

use crate::context::SocketContext;
use crate::idle::{IdleChecker, MemoryReporter};
use crate::selector::{Acceptor, Selector};
use crate::socket;

use nbio_core::error::Result;
use nbio_core::sync::SpinLock;
use nbio_core::{ndebug, ninfo};
use nbio_runtime::{RunnerGroup, TimerThread};

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A listening server and its runner groups
pub struct TcpServer {
    context: Arc<SocketContext>,
    local_addr: SocketAddr,
    accept_group: Arc<RunnerGroup>,
    io_group: Arc<RunnerGroup>,
    listeners: Vec<(Arc<Selector>, u64)>,
    timer: SpinLock<Option<TimerThread>>,
    stopped: AtomicBool,
}

impl TcpServer {
    /// Validate the config, start the runner groups and listen on `addr`
    ///
    /// Port 0 binds an ephemeral port; see `local_addr`.
    pub fn bind(addr: impl ToSocketAddrs, context: SocketContext) -> Result<TcpServer> {
        let config = context.config().clone();
        config.validate()?;
        let addr = socket::resolve(addr)?;
        let context = Arc::new(context);
        let runtime = &config.runtime;

        let io_group = Arc::new(RunnerGroup::io_group(runtime)?);
        for selector in io_group.attach(|r| Selector::create(r, &config))? {
            selector.start()?;
        }

        let accept_group = Arc::new(RunnerGroup::accept_group(runtime)?);
        let accept_selectors = accept_group.attach(|r| Selector::create(r, &config))?;
        let reuse_port = accept_selectors.len() > 1;
        let mut local_addr = addr;
        let mut listeners = Vec::with_capacity(accept_selectors.len());
        for (i, selector) in accept_selectors.iter().enumerate() {
            // Later listeners join the first one's (possibly ephemeral) port
            let listener = socket::bind_listener(&local_addr, reuse_port, config.listen_backlog)?;
            if i == 0 {
                local_addr = listener.local_addr()?;
            }
            let acceptor = Acceptor::new(listener, Arc::clone(&context), Arc::clone(&io_group));
            let token = selector.register_listener(Arc::new(acceptor))?;
            listeners.push((Arc::clone(selector), token));
            selector.start()?;
        }

        let timer = TimerThread::start(
            &format!("{}-timer", runtime.thread_name_prefix),
            runtime.check_interval,
        )?;
        timer.add(Arc::new(IdleChecker::new(Arc::clone(&context))));
        if !runtime.memory_report_interval.is_zero() {
            timer.add(Arc::new(MemoryReporter::global(runtime.memory_report_interval)));
        }

        ninfo!(
            "listening on {} ({} accept, {} io runners{})",
            local_addr,
            accept_group.len(),
            io_group.len(),
            if context.tls().is_some() { ", tls" } else { "" }
        );
        Ok(TcpServer {
            context,
            local_addr,
            accept_group,
            io_group,
            listeners,
            timer: SpinLock::new(Some(timer)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<SocketContext> {
        &self.context
    }

    pub fn io_group(&self) -> &RunnerGroup {
        &self.io_group
    }

    pub fn accept_group(&self) -> &RunnerGroup {
        &self.accept_group
    }

    pub fn session_count(&self) -> usize {
        self.context.session_count()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Stop listening, close every session and join all threads
    ///
    /// Queued events (including the Disconnect of each closed session)
    /// are drained before the runners exit. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for (selector, token) in &self.listeners {
            selector.unregister(*token);
        }
        let sessions = self.context.sessions.snapshot();
        ndebug!("closing {} sessions", sessions.len());
        for session in sessions {
            session.close();
        }
        self.accept_group.shutdown();
        self.io_group.shutdown();
        if let Some(mut timer) = self.timer.lock().take() {
            timer.shutdown();
        }
        ninfo!("server on {} stopped", self.local_addr);
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr)
            .field("accept_runners", &self.accept_group.len())
            .field("io_runners", &self.io_group.len())
            .field("sessions", &self.session_count())
            .field("running", &self.is_running())
            .finish()
    }
}
