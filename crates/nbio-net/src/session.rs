//! Session
//!
//! One connected socket, pinned to one event runner for its whole life.
//!
//! ```text
//!             selector (runner thread)                 handler (runner thread)
//!                    │                                          ▲
//!   socket ──read──► ingest ──► [TLS unwrap] ──► read channel ──┤ loader + filters
//!                                                               │
//!   socket ◄─write── flush  ◄── [TLS wrap]   ◄── write channel ◄┘ send / send_message
//! ```
//!
//! ## Design Decisions
//!
//! - The read and write channels are only touched on the owning runner
//!   thread unless `async_receive` / `async_send` switch them to
//!   thread-safe mode; other threads get `WrongThread` from them.
//!   Foreign-thread sends without `async_send` are queued on the runner
//!   instead.
//! - `flush` writes directly to the non-blocking socket, sleeping 1 ms on
//!   `WouldBlock`, and gives up with `Timeout(Send)` after `send_timeout`.
//!   Write readiness is never registered with the selector.
//! - The idle checker thread only reads atomics and submits runner tasks,
//!   so it never races the channels.
//! - `close` is idempotent from any thread. The Disconnect event that
//!   follows runs on the runner and tears down the registration.

use crate::context::SocketContext;
use crate::event;
use crate::handler::SessionEvent;
use crate::heartbeat::HeartBeat;
use crate::loader::{MessageLoader, StopReason};
use crate::message::Message;
use crate::selector::Selector;
use crate::socket;
use crate::tls::{HandshakeProgress, TlsParser, TlsSide};

use nbio_buffer::BufferChannel;
use nbio_core::error::{NetError, Result, RunnerError, TimeoutKind};
use nbio_core::state::SessionFlags;
use nbio_core::sync::SpinLock;
use nbio_core::{ndebug, ntrace};
use nbio_runtime::{priority, EventRunner};

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of one `advance_tls` pass
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TlsStep {
    /// The handshake finished and Connect was queued
    pub connected: bool,
    /// Peer sent close_notify
    pub peer_closed: bool,
}

type Attributes = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// A connected socket and everything attached to it
pub struct Session {
    id: u64,
    me: Weak<Session>,
    stream: TcpStream,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    context: Arc<SocketContext>,
    side: TlsSide,
    read: BufferChannel,
    write: BufferChannel,
    flags: SessionFlags,
    tls: Option<SpinLock<TlsParser>>,
    loader: SpinLock<MessageLoader>,
    created: Instant,
    /// Milliseconds since `created`
    last_read_ms: AtomicU64,
    last_idle_ms: AtomicU64,
    eof: AtomicBool,
    /// An Exception event has been queued
    raised: AtomicBool,
    attributes: SpinLock<Attributes>,
    heartbeat: OnceLock<Arc<HeartBeat>>,
    runner: Weak<EventRunner>,
    registration: OnceLock<(Weak<Selector>, u64)>,
}

impl Session {
    /// Wrap a connected stream; it is switched to non-blocking here
    ///
    /// The session is not registered yet: the caller hands it to a
    /// selector on `runner` at `priority::REGISTER`.
    pub fn new(
        stream: TcpStream,
        context: Arc<SocketContext>,
        side: TlsSide,
        runner: &Arc<EventRunner>,
    ) -> Result<Arc<Session>> {
        socket::configure_stream(&stream)?;
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;

        let config = context.config();
        let mut read = BufferChannel::with_max(config.buffer_size, config.channel_max_size)?;
        read.set_thread_safe(config.async_receive);
        let mut write = BufferChannel::with_max(config.buffer_size, config.channel_max_size)?;
        write.set_thread_safe(config.async_send);

        let tls = match context.tls() {
            Some(manager) => Some(SpinLock::new(manager.create_parser(side, config)?)),
            None => None,
        };
        let loader = SpinLock::new(MessageLoader::new(config.max_empty_reads));

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        ndebug!("session {} {} -> {} ({:?})", id, local_addr, remote_addr, side);
        Ok(Arc::new_cyclic(|me| Session {
            id,
            me: me.clone(),
            stream,
            local_addr,
            remote_addr,
            context,
            side,
            read,
            write,
            flags: SessionFlags::new(),
            tls,
            loader,
            created: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            last_idle_ms: AtomicU64::new(0),
            eof: AtomicBool::new(false),
            raised: AtomicBool::new(false),
            attributes: SpinLock::new(HashMap::new()),
            heartbeat: OnceLock::new(),
            runner: Arc::downgrade(runner),
            registration: OnceLock::new(),
        }))
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &Arc<SocketContext> {
        &self.context
    }

    pub fn side(&self) -> TlsSide {
        self.side
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }

    /// Plain session registered, or TLS handshake completed, and not closed
    pub fn is_connected(&self) -> bool {
        self.flags.is_connected()
    }

    /// Not closed yet (may still be handshaking)
    pub fn is_open(&self) -> bool {
        !self.flags.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.flags.is_closed()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Decrypted (or plain) bytes not yet framed
    pub fn read_channel(&self) -> &BufferChannel {
        &self.read
    }

    /// Bytes (TLS records when secured) waiting for `flush`
    pub fn write_channel(&self) -> &BufferChannel {
        &self.write
    }

    pub fn loader(&self) -> &SpinLock<MessageLoader> {
        &self.loader
    }

    pub fn heartbeat(&self) -> Option<&Arc<HeartBeat>> {
        self.heartbeat.get()
    }

    pub(crate) fn set_heartbeat(&self, heartbeat: Arc<HeartBeat>) -> bool {
        self.heartbeat.set(heartbeat).is_ok()
    }

    /// Owning runner, while it is alive
    pub fn runner(&self) -> Option<Arc<EventRunner>> {
        self.runner.upgrade()
    }

    pub fn on_runner_thread(&self) -> bool {
        self.runner
            .upgrade()
            .is_some_and(|r| r.in_runner_thread())
    }

    /// Peer sent end-of-stream
    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub(crate) fn me(&self) -> Result<Arc<Session>> {
        self.me.upgrade().ok_or(NetError::Released)
    }

    // ── Attributes ───────────────────────────────────────────────────────

    pub fn set_attribute<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.attributes.lock().insert(key.to_string(), Arc::new(value));
    }

    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.attributes.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.lock().contains_key(key)
    }

    /// True if the key was present
    pub fn remove_attribute(&self, key: &str) -> bool {
        self.attributes.lock().remove(key).is_some()
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Queue raw bytes (TLS-wrapped when secured)
    ///
    /// Flushes whenever the write channel reaches `buffer_size`. From a
    /// foreign thread without `async_send` the bytes are copied and the
    /// send runs on the owning runner.
    pub fn send(&self, bytes: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(NetError::Released);
        }
        if !self.context.config().async_send && !self.on_runner_thread() {
            let me = self.me()?;
            let data = bytes.to_vec();
            self.submit(move || {
                if me.send(&data).is_ok() {
                    let _ = me.flush();
                }
            })?;
            return Ok(bytes.len());
        }

        let claimed = self.flags.begin_send();
        let result = self.queue_bytes(bytes);
        if claimed {
            self.flags.end_send();
        }
        result
    }

    fn queue_bytes(&self, bytes: &[u8]) -> Result<usize> {
        let threshold = self.context.config().buffer_size.max(1);
        for part in bytes.chunks(threshold) {
            match &self.tls {
                Some(tls) => {
                    tls.lock().wrap(part, &self.write)?;
                }
                None => {
                    self.write.write_tail(part)?;
                }
            }
            if self.write.size() >= threshold {
                self.flush()?;
            }
        }
        Ok(bytes.len())
    }

    /// Encode through the filter chain, send, flush and fire Sent
    ///
    /// Routed through the runner queue when called from another thread
    /// without `async_send`.
    pub fn send_message(self: &Arc<Self>, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(NetError::Released);
        }
        if !self.context.config().async_send && !self.on_runner_thread() {
            let me = Arc::clone(self);
            return self.submit(move || {
                if let Err(e) = event::write_message(&me, message, true) {
                    me.fail(e);
                }
            });
        }
        event::write_message(self, message, true)
    }

    /// Write the write channel to the socket
    ///
    /// Returns the bytes written. A flush already in progress (another
    /// thread in async send mode) makes this a no-op; that flusher picks up
    /// our bytes before letting go. A call from a foreign thread without
    /// `async_send` queues the flush on the runner. On failure the session
    /// is failed as well as the error returned.
    pub fn flush(&self) -> Result<usize> {
        if self.is_closed() {
            return Err(NetError::Released);
        }
        if !self.context.config().async_send && !self.on_runner_thread() {
            let me = self.me()?;
            self.submit(move || {
                let _ = me.flush();
            })?;
            return Ok(0);
        }
        let mut total = 0;
        while self.flags.begin_flush() {
            let result = self.write_out(self.context.config().send_timeout);
            self.flags.end_flush();
            match result {
                Ok(n) => total += n,
                Err(e) => {
                    self.fail(e.clone());
                    return Err(e);
                }
            }
            // Appends made while we held the flag were left for us
            if self.write.is_empty() {
                break;
            }
        }
        if total > 0 {
            ntrace!("session {} flushed {} bytes", self.id, total);
            let _ = self.fire(SessionEvent::Flush);
        }
        Ok(total)
    }

    fn write_out(&self, timeout: Duration) -> Result<usize> {
        let mut view = self.write.borrow()?;
        let deadline = Instant::now() + timeout;
        let mut written = 0;
        while !view.is_empty() {
            match (&self.stream).write(view.data()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    view.advance(n)?;
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(NetError::Timeout(TimeoutKind::Send));
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    // ── Synchronous read ─────────────────────────────────────────────────

    /// Block for the next message a `SynchronousHandler` queued
    ///
    /// Waits up to `read_timeout`, or `send_timeout` when read timeouts
    /// are off. Never call this on the session's runner: that thread is
    /// the one delivering the message.
    pub fn sync_read(&self) -> Result<Message> {
        let handler = Arc::clone(self.context.handler());
        let Some(sync) = handler.synchronous() else {
            return Err(NetError::protocol("sync_read needs a SynchronousHandler"));
        };
        if self.on_runner_thread() {
            return Err(NetError::protocol("sync_read called on the session's runner"));
        }
        let config = self.context.config();
        let timeout = if config.read_timeout.is_zero() {
            config.send_timeout
        } else {
            config.read_timeout
        };
        sync.next_response(self, timeout)
    }

    // ── Close ────────────────────────────────────────────────────────────

    /// Close the session; only the first call has any effect
    ///
    /// On the owning runner a TLS close_notify and any buffered output are
    /// written once, best effort. The socket is shut down immediately and
    /// a Disconnect event follows on the runner.
    pub fn close(&self) -> bool {
        if !self.flags.mark_closed() {
            return false;
        }
        self.loader.lock().set_stop_reason(StopReason::SocketClosed);
        if self.on_runner_thread() {
            if let Some(tls) = &self.tls {
                if let Some(mut parser) = tls.try_lock() {
                    let _ = parser.close(&self.write);
                }
            }
            let _ = self.write_out(Duration::ZERO);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        ndebug!("session {} closed", self.id);

        if let Ok(me) = self.me() {
            if event::fire(&me, SessionEvent::Disconnect).is_err() {
                // Runner is gone; tear down here
                event::process(&me, SessionEvent::Disconnect);
            }
        }
        true
    }

    /// Route an error: peer disconnects close quietly, anything else is
    /// reported through `on_exception` (which closes)
    pub fn fail(&self, error: NetError) {
        if self.is_closed() {
            return;
        }
        if error.is_disconnect() {
            ndebug!("session {} peer gone: {}", self.id, error);
            self.close();
            return;
        }
        self.raise(error);
    }

    fn raise(&self, error: NetError) {
        // The first exception closes the session; later ones are echoes of it
        if self.raised.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.fire(SessionEvent::Exception(error)).is_err() {
            self.close();
        }
    }

    // ── Runner-side plumbing ─────────────────────────────────────────────

    /// Queue `event` on the owning runner
    pub fn fire(&self, event: SessionEvent) -> Result<()> {
        event::fire(&self.me()?, event)
    }

    fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let runner = self.runner().ok_or(NetError::Runner(RunnerError::ShutDown))?;
        runner.add_event(priority::EVENT, task)?;
        Ok(())
    }

    pub(crate) fn set_registration(&self, selector: &Arc<Selector>, token: u64) -> bool {
        self.registration.set((Arc::downgrade(selector), token)).is_ok()
    }

    /// Remove from the selector and the runner's count (Disconnect only)
    pub(crate) fn detach(&self) {
        if let Some((selector, token)) = self.registration.get() {
            if let Some(selector) = selector.upgrade() {
                selector.unregister(*token);
            }
            if let Some(runner) = self.runner() {
                runner.session_unbound();
            }
        }
    }

    /// Free both channels' native memory
    pub(crate) fn release_channels(&self) {
        let _ = self.read.release();
        let _ = self.write.release();
    }

    #[inline]
    fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.created).as_millis() as u64
    }

    fn touch(&self) {
        self.last_read_ms
            .store(self.elapsed_ms(Instant::now()), Ordering::Release);
    }

    /// Room left for network bytes before the receiving channel is full
    fn read_room(&self) -> usize {
        let room = self.read.available();
        match &self.tls {
            Some(tls) => {
                let pending = tls.lock().network_pending();
                room.min(self.context.config().channel_max_size.saturating_sub(pending))
            }
            None => room,
        }
    }

    /// Drain the socket into the session (runner thread, on readiness)
    pub(crate) fn ingest(&self, scratch: &mut [u8]) {
        if self.is_closed() {
            return;
        }
        let mut total = 0;
        let mut eof = false;
        // Stop early once the channels are full; level-triggered readiness
        // brings us back after the handler has drained them
        loop {
            let room = self.read_room().min(scratch.len());
            if room == 0 {
                if total == 0 {
                    self.read_stalled();
                    return;
                }
                break;
            }
            match (&self.stream).read(&mut scratch[..room]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    total += n;
                    let pushed = match &self.tls {
                        Some(tls) => tls.lock().push_network(&scratch[..n]),
                        None => self.read.write_tail(&scratch[..n]).map(|_| ()).map_err(Into::into),
                    };
                    if let Err(e) = pushed {
                        self.fail(e);
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.fail(e.into());
                    return;
                }
            }
        }

        if !eof {
            let counted = self.loader.lock().record_read(total);
            if let Err(e) = counted {
                self.fail(e);
                return;
            }
        }
        if total > 0 {
            self.touch();
            ntrace!("session {} read {} bytes", self.id, total);
        }
        let mut step = TlsStep::default();
        if self.tls.is_some() {
            match self.advance_tls() {
                Ok(done) => step = done,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
        eof |= step.peer_closed;

        if eof {
            self.eof.store(true, Ordering::Release);
            self.loader.lock().set_stop_reason(StopReason::StreamEnd);
        }
        // After a handshake-completing read the queued Connect frames
        // whatever arrived with the peer's Finished
        if self.is_connected() && !step.connected && !self.read.is_empty() {
            self.schedule_receive();
        }
        if eof {
            // Behind any queued Receive; one hop later when Connect still
            // has to queue its own
            if let Ok(me) = self.me() {
                let behind_connect = step.connected;
                let _ = self.submit(move || {
                    let again = Arc::clone(&me);
                    let requeued = behind_connect
                        && me
                            .submit(move || {
                                again.close();
                            })
                            .is_ok();
                    if !requeued {
                        me.close();
                    }
                });
            }
        }
    }

    /// Readable socket, full channels, nothing read
    ///
    /// A queued Receive will make room. Otherwise the splitter has already
    /// looked at a full channel and found no frame, which no amount of
    /// waiting fixes.
    fn read_stalled(&self) {
        if self.flags.is_receiving() {
            return;
        }
        self.fail(NetError::protocol(format!(
            "no frame within {} buffered bytes",
            self.context.config().channel_max_size
        )));
    }

    /// Handshake, decrypt and write back whatever TLS produced
    pub(crate) fn advance_tls(&self) -> Result<TlsStep> {
        let Some(tls) = &self.tls else {
            return Ok(TlsStep::default());
        };
        let (completed, peer_closed) = {
            let mut parser = tls.lock();
            let progress = parser.drive_handshake(&self.write)?;
            if parser.is_handshake_done() {
                parser.unwrap(&self.read)?;
                parser.write_pending(&self.write)?;
            }
            (progress == HandshakeProgress::Completed, parser.is_peer_closed())
        };
        if !self.write.is_empty() {
            self.flush()?;
        }
        let mut connected = false;
        if completed {
            ndebug!("session {} tls handshake complete", self.id);
            if self.flags.mark_connected() {
                self.fire(SessionEvent::Connect)?;
                connected = true;
            }
        }
        Ok(TlsStep {
            connected,
            peer_closed,
        })
    }

    /// Frame buffered input, inline or as a queued event
    pub(crate) fn schedule_receive(&self) {
        if !self.flags.begin_receive() {
            return;
        }
        let Ok(me) = self.me() else {
            self.flags.end_receive();
            return;
        };
        if self.context.config().async_receive {
            if self.fire(SessionEvent::Receive).is_err() {
                self.flags.end_receive();
            }
        } else {
            event::process(&me, SessionEvent::Receive);
        }
    }

    /// Timer-thread checks: handshake, idle and read timeouts
    pub(crate) fn check_timeouts(&self, now: Instant) {
        if self.is_closed() {
            return;
        }
        let config = self.context.config();
        let now_ms = self.elapsed_ms(now);

        if self.tls.is_some()
            && !self.is_connected()
            && !config.connect_timeout.is_zero()
            && now_ms >= config.connect_timeout.as_millis() as u64
        {
            self.raise(NetError::Timeout(TimeoutKind::Handshake));
            return;
        }
        if !self.is_connected() {
            return;
        }

        let last_read = self.last_read_ms.load(Ordering::Acquire);
        if !config.idle_interval.is_zero() {
            let last = last_read.max(self.last_idle_ms.load(Ordering::Acquire));
            if now_ms.saturating_sub(last) >= config.idle_interval.as_millis() as u64 {
                self.last_idle_ms.store(now_ms, Ordering::Release);
                let _ = self.fire(SessionEvent::Idle);
            }
        }

        if !config.read_timeout.is_zero()
            && now_ms.saturating_sub(last_read) >= config.read_timeout.as_millis() as u64
        {
            // The channel is runner-owned; look at it from there
            if let Ok(me) = self.me() {
                let _ = self.submit(move || {
                    if !me.is_closed() && me.read.is_empty() {
                        me.raise(NetError::Timeout(TimeoutKind::Read));
                    }
                });
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("local", &self.local_addr)
            .field("remote", &self.remote_addr)
            .field("side", &self.side)
            .field("tls", &self.tls.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::splitter::TransferSplitter;
    use crate::testutil;

    fn wait_closed(session: &Session) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if session.is_closed() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_attributes() {
        let fx = testutil::fixture(testutil::context(TransferSplitter));
        let s = &fx.session;
        assert!(!s.has_attribute("user"));
        s.set_attribute("user", String::from("ada"));
        s.set_attribute("hits", 3u32);
        assert_eq!(s.attribute::<String>("user").as_deref().map(String::as_str), Some("ada"));
        assert_eq!(s.attribute::<u32>("hits").as_deref(), Some(&3));
        // wrong type is a miss, not a panic
        assert!(s.attribute::<u64>("hits").is_none());
        assert!(s.remove_attribute("user"));
        assert!(!s.remove_attribute("user"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let fx = testutil::fixture(testutil::context(TransferSplitter));
        assert!(fx.session.is_open());
        assert!(fx.session.close());
        assert!(!fx.session.close());
        assert!(fx.session.is_closed());
        assert_eq!(fx.session.send(b"late"), Err(NetError::Released));
        assert_eq!(fx.session.flush(), Err(NetError::Released));
    }

    #[test]
    fn test_addresses_match_stream() {
        let fx = testutil::fixture(testutil::context(TransferSplitter));
        assert_eq!(fx.session.remote_addr(), fx.peer.local_addr().unwrap());
        assert_eq!(fx.session.local_addr(), fx.peer.peer_addr().unwrap());
        assert!(!fx.session.is_tls());
        assert_eq!(fx.session.side(), TlsSide::Server);
    }

    #[test]
    fn test_foreign_thread_send_runs_on_runner() {
        let fx = testutil::fixture(testutil::context(TransferSplitter));
        assert!(!fx.session.on_runner_thread());
        assert_eq!(fx.session.send(b"queued").unwrap(), 6);
        let mut peer = fx.peer.try_clone().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"queued");
    }

    #[test]
    fn test_concurrent_async_flushes_strand_nothing() {
        let ctx = testutil::context(TransferSplitter).with_config(NetConfig::new().async_send(true));
        let fx = testutil::fixture(ctx);
        let (threads, rounds, chunk) = (4, 200, [b'z'; 16]);
        let senders: Vec<_> = (0..threads)
            .map(|_| {
                let session = Arc::clone(&fx.session);
                thread::spawn(move || {
                    for _ in 0..rounds {
                        session.send(&chunk).unwrap();
                        session.flush().unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }
        // every flush either wrote or was covered by the one in progress
        assert!(fx.session.write_channel().is_empty());

        let mut peer = fx.peer.try_clone().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut all = vec![0u8; threads * rounds * chunk.len()];
        peer.read_exact(&mut all).unwrap();
        assert!(all.iter().all(|&b| b == b'z'));
    }

    #[test]
    fn test_empty_read_cap_closes_session() {
        let ctx = testutil::context(TransferSplitter).with_config(NetConfig::new().max_empty_reads(3));
        let fx = testutil::fixture(ctx);
        let mut scratch = [0u8; 64];
        // readiness with nothing behind it
        fx.session.ingest(&mut scratch);
        fx.session.ingest(&mut scratch);
        // real bytes reset the count
        (&fx.peer).write_all(b"x").unwrap();
        thread::sleep(Duration::from_millis(20));
        fx.session.ingest(&mut scratch);
        assert_eq!(fx.session.read_channel().size(), 1);
        fx.session.ingest(&mut scratch);
        fx.session.ingest(&mut scratch);
        assert!(!fx.session.raised.load(Ordering::Acquire));
        assert!(fx.session.is_open());

        fx.session.ingest(&mut scratch);
        assert!(fx.session.raised.load(Ordering::Acquire));
        assert!(wait_closed(&fx.session));
    }

    #[test]
    fn test_full_channel_without_frame_is_protocol_error() {
        use crate::splitter::MessageSplitter;

        struct Never;
        impl MessageSplitter for Never {
            fn can_split(&self, _session: &Session, _data: &[u8]) -> Option<usize> {
                None
            }
        }

        let ctx = testutil::context(Never)
            .with_config(NetConfig::new().buffer_size(16).channel_max_size(32));
        let fx = testutil::fixture(ctx);
        (&fx.peer).write_all(&[7u8; 100]).unwrap();
        thread::sleep(Duration::from_millis(20));
        let mut scratch = [0u8; 64];
        fx.session.ingest(&mut scratch);
        assert_eq!(fx.session.read_channel().size(), 32);
        assert!(fx.session.is_open());
        // no room and nobody draining: fail now instead of counting empty reads
        fx.session.ingest(&mut scratch);
        assert!(fx.session.raised.load(Ordering::Acquire));
        assert!(wait_closed(&fx.session));
    }
}
