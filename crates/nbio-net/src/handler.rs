//! Application callbacks and session events

use crate::message::Message;
use crate::session::Session;

use nbio_core::error::{NetError, Result, TimeoutKind};

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Application hooks, all invoked on the session's runner thread
///
/// Returning `Some` from `on_connect` or `on_receive` sends that message
/// back through the filter chain.
pub trait IoHandler: Send + Sync {
    fn on_connect(&self, _session: &Arc<Session>) -> Option<Message> {
        None
    }

    fn on_disconnect(&self, _session: &Arc<Session>) {}

    fn on_receive(&self, session: &Arc<Session>, message: Message) -> Option<Message>;

    fn on_sent(&self, _session: &Arc<Session>, _message: &Message) {}

    fn on_flush(&self, _session: &Arc<Session>) {}

    /// The session is closed right after this returns
    fn on_exception(&self, _session: &Arc<Session>, _error: &NetError) {}

    fn on_idle(&self, _session: &Arc<Session>) {}

    /// The response queue behind `Session::sync_read`, if this handler
    /// keeps one
    fn synchronous(&self) -> Option<&SynchronousHandler> {
        None
    }
}

/// Queues what arrives for a caller blocked in `Session::sync_read`
///
/// Every received message is queued instead of answered. The error that
/// ends a session is queued too, so the reader sees why it stopped.
#[derive(Debug, Default)]
pub struct SynchronousHandler {
    responses: Mutex<VecDeque<Result<Message>>>,
    ready: Condvar,
}

impl SynchronousHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Result<Message>>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, response: Result<Message>) {
        self.queue().push_back(response);
        self.ready.notify_all();
    }

    pub fn has_response(&self) -> bool {
        !self.queue().is_empty()
    }

    /// Next queued response, waiting up to `timeout` while `session` is open
    pub fn next_response(&self, session: &Session, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue();
        loop {
            if let Some(response) = queue.pop_front() {
                return response;
            }
            if session.is_closed() {
                return Err(NetError::Released);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(NetError::Timeout(TimeoutKind::Read));
            }
            queue = self
                .ready
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl IoHandler for SynchronousHandler {
    fn on_disconnect(&self, _session: &Arc<Session>) {
        // Wake readers so they notice the close
        let _queue = self.queue();
        self.ready.notify_all();
    }

    fn on_receive(&self, _session: &Arc<Session>, message: Message) -> Option<Message> {
        self.push(Ok(message));
        None
    }

    fn on_exception(&self, _session: &Arc<Session>, error: &NetError) {
        self.push(Err(error.clone()));
    }

    fn synchronous(&self) -> Option<&SynchronousHandler> {
        Some(self)
    }
}

/// Everything that can happen to a session
///
/// Events are queued on the owning runner at `priority::EVENT` and
/// dispatched there, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Registered with a selector; starts the TLS handshake if any
    Accepted,
    /// Plain connection registered, or TLS handshake completed
    Connect,
    /// Buffered bytes are waiting for the splitter
    Receive,
    Sent(Message),
    Flush,
    Idle,
    Disconnect,
    Exception(NetError),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Accepted => "accepted",
            SessionEvent::Connect => "connect",
            SessionEvent::Receive => "receive",
            SessionEvent::Sent(_) => "sent",
            SessionEvent::Flush => "flush",
            SessionEvent::Idle => "idle",
            SessionEvent::Disconnect => "disconnect",
            SessionEvent::Exception(_) => "exception",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
