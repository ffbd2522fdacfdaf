//! TCP client
//!
//! One connection on its own single-runner group, driven by the same
//! selector, session and event code as the server side.
//!
//! ```rust,ignore
//! let client = TcpClient::connect("127.0.0.1:7000", SocketContext::new(Printer))?;
//! client.wait_connected(Duration::from_secs(5));
//! client.send_sync(Message::from("hello"))?;
//! ```
//!
//! Request/response callers install a `SynchronousHandler` and pair
//! `send_sync` with `sync_read`.

use crate::context::SocketContext;
use crate::event;
use crate::idle::IdleChecker;
use crate::message::Message;
use crate::selector::Selector;
use crate::session::Session;
use crate::socket;
use crate::tls::TlsSide;

use nbio_core::error::{NetError, Result, RunnerError, TimeoutKind};
use nbio_core::{ndebug, nwarn};
use nbio_runtime::{priority, RunnerGroup, TimerThread};

use std::net::ToSocketAddrs;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Extra wait on top of `send_timeout` for the runner to pick up the task
const SEND_SYNC_MARGIN: Duration = Duration::from_secs(1);

/// A connected client session
pub struct TcpClient {
    session: Arc<Session>,
    group: RunnerGroup,
    timer: Option<TimerThread>,
}

impl TcpClient {
    /// Blocking connect bounded by `connect_timeout`, then hand the socket
    /// to a private runner
    ///
    /// Returns once the session is queued for registration; TLS sessions
    /// are connected only after the handshake (see `wait_connected`).
    pub fn connect(addr: impl ToSocketAddrs, context: SocketContext) -> Result<TcpClient> {
        let config = context.config().clone();
        config.validate()?;
        let addr = socket::resolve(addr)?;
        let stream = socket::connect(&addr, config.connect_timeout)?;
        let context = Arc::new(context);
        let runtime = &config.runtime;

        let group = RunnerGroup::new(
            &format!("{}-client", runtime.thread_name_prefix),
            1,
            runtime.park_timeout,
        )?;
        let selector = group
            .attach(|r| Selector::create(r, &config))?
            .pop()
            .ok_or(NetError::Runner(RunnerError::ShutDown))?;
        selector.start()?;

        let runner = group.choose();
        let session = Session::new(stream, Arc::clone(&context), TlsSide::Client, runner)?;
        let registered = Arc::clone(&session);
        runner.add_event(priority::REGISTER, move || {
            if let Err(e) = selector.register_session(Arc::clone(&registered)) {
                nwarn!("client session {} registration failed: {}", registered.id(), e);
                registered.close();
            }
        })?;

        let timer = TimerThread::start(
            &format!("{}-client-timer", runtime.thread_name_prefix),
            runtime.check_interval,
        )?;
        timer.add(Arc::new(IdleChecker::new(context)));

        ndebug!("client connected to {}", addr);
        Ok(TcpClient {
            session,
            group,
            timer: Some(timer),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Wait for the Connect transition; false on timeout or close
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.session.is_connected() {
                return true;
            }
            if self.session.is_closed() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Encode, send and flush on the runner, waiting for the outcome
    pub fn send_sync(&self, message: Message) -> Result<()> {
        if self.session.is_closed() {
            return Err(NetError::Released);
        }
        let runner = self
            .session
            .runner()
            .ok_or(NetError::Runner(RunnerError::ShutDown))?;
        let (tx, rx) = mpsc::channel();
        let session = Arc::clone(&self.session);
        runner.add_event(priority::EVENT, move || {
            let _ = tx.send(event::write_message(&session, message, true));
        })?;
        let wait = self.session.context().config().send_timeout + SEND_SYNC_MARGIN;
        rx.recv_timeout(wait)
            .map_err(|_| NetError::Timeout(TimeoutKind::Send))?
    }

    /// Next message queued by the context's `SynchronousHandler`
    ///
    /// See `Session::sync_read`.
    pub fn sync_read(&self) -> Result<Message> {
        self.session.sync_read()
    }

    /// Queue a message; returns without waiting
    pub fn send(&self, message: Message) -> Result<()> {
        self.session.send_message(message)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn close(&self) -> bool {
        self.session.close()
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.session.close();
        self.group.shutdown();
        if let Some(mut timer) = self.timer.take() {
            timer.shutdown();
        }
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("session", &self.session)
            .finish()
    }
}
