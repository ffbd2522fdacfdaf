//! Readiness multiplexer
//!
//! One `Selector` per event runner, installed as the runner's attachment.
//! It never owns a thread: `select_once` is a runner task that re-queues
//! itself at `priority::SELECT`, below registrations and session events.
//!
//! ```text
//!   select_once
//!     ├─ epoll_wait(0)                      non-blocking peek
//!     ├─ epoll_wait(select_interval)        only when nothing ready and the queue is empty
//!     ├─ dispatch
//!     │    ├─ WAKER token   → drain eventfd
//!     │    ├─ Listener      → accept loop → IO runner (REGISTER)
//!     │    └─ Session       → ingest(scratch)
//!     └─ add_event(SELECT, select_once)     while the runner is running
//! ```
//!
//! ## Design Decisions
//!
//! - Level-triggered `EPOLLIN | EPOLLRDHUP`. A session that stops reading
//!   because its channels are full is simply reported again.
//! - Write interest is never registered; sessions write directly.
//! - Hang-up and error bits go through `ingest` too, so buffered input is
//!   still delivered before the end-of-stream close.
//! - Tokens index a slab with a free list. The eventfd uses `u64::MAX`.

use crate::config::NetConfig;
use crate::context::SocketContext;
use crate::session::Session;
use crate::tls::TlsSide;

use nbio_core::error::{NetError, Result, RunnerError};
use nbio_core::sync::SpinLock;
use nbio_core::{ndebug, nerror, ntrace, nwarn};
use nbio_runtime::{priority, EventFdNotifier, EventRunner, Notifier, RunnerGroup};

use std::io;
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Token reserved for the runner's eventfd
const WAKER_TOKEN: u64 = u64::MAX;

/// `epoll_event` slots per poll
const MAX_EVENTS: usize = 256;

const READ_INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;

/// What a token refers to
#[derive(Clone)]
enum Registration {
    Listener(Arc<Acceptor>),
    Session(Arc<Session>),
}

impl Registration {
    fn fd(&self) -> RawFd {
        match self {
            Registration::Listener(a) => a.listener.as_raw_fd(),
            Registration::Session(s) => s.fd(),
        }
    }
}

/// Token → registration, with slot reuse
struct Slab {
    slots: Vec<Option<Registration>>,
    free: Vec<usize>,
    live: usize,
}

impl Slab {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    fn insert(&mut self, reg: Registration) -> usize {
        self.live += 1;
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(reg);
                idx
            }
            None => {
                self.slots.push(Some(reg));
                self.slots.len() - 1
            }
        }
    }

    fn get(&self, idx: usize) -> Option<&Registration> {
        self.slots.get(idx)?.as_ref()
    }

    fn remove(&mut self, idx: usize) -> Option<Registration> {
        let reg = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.live -= 1;
        Some(reg)
    }
}

#[inline]
fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// epoll reactor bound to one runner
pub struct Selector {
    epfd: RawFd,
    waker: Arc<EventFdNotifier>,
    scratch: SpinLock<Vec<u8>>,
    events: SpinLock<Vec<libc::epoll_event>>,
    slab: SpinLock<Slab>,
    select_interval: Duration,
    runner: Weak<EventRunner>,
}

impl Selector {
    /// Create the epoll instance and waker, and hook the waker into `runner`
    ///
    /// Does not start polling; call `start` once the attachment is set.
    pub fn create(runner: &Arc<EventRunner>, config: &NetConfig) -> Result<Arc<Selector>> {
        let epfd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        let waker = match EventFdNotifier::create() {
            Ok(w) => Arc::new(w),
            Err(e) => {
                unsafe { libc::close(epfd) };
                return Err(e.into());
            }
        };
        let selector = Arc::new(Selector {
            epfd,
            waker,
            scratch: SpinLock::new(vec![0u8; config.buffer_size.max(1)]),
            events: SpinLock::new(vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS]),
            slab: SpinLock::new(Slab::new()),
            select_interval: config.select_interval,
            runner: Arc::downgrade(runner),
        });
        selector.ctl(libc::EPOLL_CTL_ADD, selector.waker.fd(), WAKER_TOKEN)?;
        runner.set_waker(Arc::clone(&selector.waker) as Arc<dyn Notifier>);
        ndebug!("selector ready on runner {}", runner.name());
        Ok(selector)
    }

    /// Queue the first `select_once`
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let runner = self.runner()?;
        let me = Arc::clone(self);
        runner.add_event(priority::SELECT, move || me.select_once())?;
        Ok(())
    }

    fn runner(&self) -> Result<Arc<EventRunner>> {
        self.runner
            .upgrade()
            .ok_or(NetError::Runner(RunnerError::ShutDown))
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: READ_INTEREST,
            u64: token,
        };
        cvt(unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) })?;
        Ok(())
    }

    /// Registered listeners plus sessions
    pub fn registered(&self) -> usize {
        self.slab.lock().live
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Watch a listener; may be called from any thread
    pub(crate) fn register_listener(&self, acceptor: Arc<Acceptor>) -> Result<u64> {
        let fd = acceptor.listener.as_raw_fd();
        let token = self.slab.lock().insert(Registration::Listener(acceptor)) as u64;
        if let Err(e) = self.ctl(libc::EPOLL_CTL_ADD, fd, token) {
            self.slab.lock().remove(token as usize);
            return Err(e.into());
        }
        Ok(token)
    }

    /// Watch a session and fire Accepted (runner thread, REGISTER priority)
    pub(crate) fn register_session(self: &Arc<Self>, session: Arc<Session>) -> Result<u64> {
        let fd = session.fd();
        let token = self
            .slab
            .lock()
            .insert(Registration::Session(Arc::clone(&session))) as u64;
        if let Err(e) = self.ctl(libc::EPOLL_CTL_ADD, fd, token) {
            self.slab.lock().remove(token as usize);
            return Err(e.into());
        }
        session.set_registration(self, token);
        if let Some(runner) = session.runner() {
            runner.session_bound();
        }
        session.context().sessions.add(&session);
        session.fire(crate::handler::SessionEvent::Accepted)?;
        ntrace!("session {} registered as token {}", session.id(), token);
        Ok(token)
    }

    /// Forget `token` and remove its fd from the interest set
    pub(crate) fn unregister(&self, token: u64) -> bool {
        let removed = self.slab.lock().remove(token as usize);
        match removed {
            Some(reg) => {
                // The fd may already be shut down; removal is best effort
                let _ = self.ctl(libc::EPOLL_CTL_DEL, reg.fd(), token);
                true
            }
            None => false,
        }
    }

    // ── Poll loop ────────────────────────────────────────────────────────

    fn wait(&self, events: &mut [libc::epoll_event], timeout: Duration) -> usize {
        let ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let n = unsafe {
            libc::epoll_wait(self.epfd, events.as_mut_ptr(), events.len() as libc::c_int, ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                nerror!("epoll_wait failed: {}", err);
            }
            return 0;
        }
        n as usize
    }

    /// One poll-and-dispatch round; re-queues itself while the runner runs
    pub(crate) fn select_once(self: &Arc<Self>) {
        let Some(runner) = self.runner.upgrade() else {
            return;
        };
        {
            let mut events = self.events.lock();
            let mut n = self.wait(&mut events, Duration::ZERO);
            if n == 0 && runner.pending() == 0 && runner.is_running() {
                n = self.wait(&mut events, self.select_interval);
            }
            let mut scratch = self.scratch.lock();
            for ev in events.iter().take(n) {
                // Copy out of the (possibly packed) struct
                let token = ev.u64;
                let bits = ev.events;
                self.dispatch(token, bits, &mut scratch);
            }
        }
        if runner.is_running() {
            let me = Arc::clone(self);
            if runner.add_event(priority::SELECT, move || me.select_once()).is_err() {
                ndebug!("selector on {} stopped", runner.name());
            }
        }
    }

    fn dispatch(&self, token: u64, bits: u32, scratch: &mut [u8]) {
        if token == WAKER_TOKEN {
            self.waker.drain();
            return;
        }
        let entry = self.slab.lock().get(token as usize).cloned();
        match entry {
            Some(Registration::Listener(acceptor)) => acceptor.accept_ready(),
            Some(Registration::Session(session)) => {
                ntrace!("session {} ready bits {:#x}", session.id(), bits);
                session.ingest(scratch);
            }
            None => {}
        }
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("epfd", &self.epfd)
            .field("registered", &self.registered())
            .field("select_interval", &self.select_interval)
            .finish()
    }
}

// ============================================================================
// Acceptor
// ============================================================================

/// A listening socket and where its connections go
pub(crate) struct Acceptor {
    listener: TcpListener,
    context: Arc<SocketContext>,
    io_group: Arc<RunnerGroup>,
}

impl Acceptor {
    pub(crate) fn new(
        listener: TcpListener,
        context: Arc<SocketContext>,
        io_group: Arc<RunnerGroup>,
    ) -> Self {
        Self {
            listener,
            context,
            io_group,
        }
    }

    /// Accept until the backlog is empty
    fn accept_ready(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    ntrace!("accepted {}", peer);
                    self.hand_off(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // EMFILE and friends: leave the rest in the backlog
                    nwarn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Pin the connection to the next IO runner and register it there
    fn hand_off(&self, stream: std::net::TcpStream) {
        let runner = self.io_group.choose();
        let Some(selector) = runner.attachment::<Selector>() else {
            nerror!("runner {} has no selector", runner.name());
            return;
        };
        let session = match Session::new(stream, Arc::clone(&self.context), TlsSide::Server, runner) {
            Ok(s) => s,
            Err(e) => {
                nwarn!("dropping connection: {}", e);
                return;
            }
        };
        let submitted = runner.add_event(priority::REGISTER, move || {
            if let Err(e) = selector.register_session(Arc::clone(&session)) {
                nwarn!("session {} registration failed: {}", session.id(), e);
                session.close();
            }
        });
        if let Err(e) = submitted {
            nwarn!("runner {} refused connection: {}", runner.name(), e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
