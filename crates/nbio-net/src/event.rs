//! Session event dispatch
//!
//! Every `SessionEvent` is queued on the session's runner at
//! `priority::EVENT` and handled here, on that thread. A handler panic or
//! error fails the session; it never takes the runner down.

use crate::handler::SessionEvent;
use crate::heartbeat::HeartBeat;
use crate::loader;
use crate::message::Message;
use crate::session::Session;

use nbio_core::error::{NetError, Result, RunnerError};
use nbio_core::{ndebug, nerror, ntrace};
use nbio_runtime::priority;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Queue `event` for `session` on its runner
pub fn fire(session: &Arc<Session>, event: SessionEvent) -> Result<()> {
    let runner = session
        .runner()
        .ok_or(NetError::Runner(RunnerError::ShutDown))?;
    let target = Arc::clone(session);
    runner.add_event(priority::EVENT, move || process(&target, event))?;
    Ok(())
}

/// Handle `event` now, on the calling thread
pub fn process(session: &Arc<Session>, event: SessionEvent) {
    let name = event.name();
    ntrace!("session {} event {}", session.id(), name);
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch(session, event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => session.fail(e),
        Err(_) => {
            nerror!("session {} handler panicked during {}", session.id(), name);
            session.fail(NetError::protocol(format!("handler panicked during {}", name)));
        }
    }
}

fn dispatch(session: &Arc<Session>, event: SessionEvent) -> Result<()> {
    if session.is_closed() && event != SessionEvent::Disconnect {
        if event == SessionEvent::Receive {
            session.flags().end_receive();
        }
        return Ok(());
    }
    let context = Arc::clone(session.context());
    let handler = context.handler();

    match event {
        SessionEvent::Accepted => {
            if let Some(config) = context.heartbeat() {
                HeartBeat::attach(session, config.clone());
            }
            if session.is_tls() {
                // Client sends its hello here; the server just checks input
                session.advance_tls()?;
            } else if session.flags().mark_connected() {
                session.fire(SessionEvent::Connect)?;
            }
        }
        SessionEvent::Connect => {
            if let Some(reply) = handler.on_connect(session) {
                write_message(session, reply, true)?;
            } else if !session.write_channel().is_empty() {
                session.flush()?;
            }
            if !session.read_channel().is_empty() {
                session.schedule_receive();
            }
        }
        SessionEvent::Receive => {
            let result = receive(session);
            session.flags().end_receive();
            result?;
        }
        SessionEvent::Sent(message) => handler.on_sent(session, &message),
        SessionEvent::Flush => handler.on_flush(session),
        SessionEvent::Idle => {
            handler.on_idle(session);
            if let Some(heartbeat) = session.heartbeat() {
                if !heartbeat.beat(session)? {
                    ndebug!(
                        "session {} missed {} heartbeats, closing",
                        session.id(),
                        heartbeat.failed_count()
                    );
                    session.close();
                }
            }
        }
        SessionEvent::Disconnect => {
            session.detach();
            handler.on_disconnect(session);
            session.release_channels();
        }
        SessionEvent::Exception(error) => {
            ndebug!("session {} exception: {}", session.id(), error);
            handler.on_exception(session, &error);
            session.close();
        }
    }
    Ok(())
}

/// Frame, decode and hand every complete message to the handler
fn receive(session: &Arc<Session>) -> Result<()> {
    let context = Arc::clone(session.context());
    if let Some(heartbeat) = session.heartbeat() {
        heartbeat.intercept(session)?;
    }
    while !session.is_closed() {
        let Some(frame) = loader::next_frame(session)? else {
            break;
        };
        let Some(message) = context.filters().decode(session, Message::Bytes(frame))? else {
            continue;
        };
        if let Some(reply) = context.handler().on_receive(session, message) {
            write_message(session, reply, false)?;
        }
    }
    if !session.is_closed() && !session.write_channel().is_empty() {
        session.flush()?;
    }
    Ok(())
}

/// Encode, queue and fire Sent; flush now when `flush` is set
pub(crate) fn write_message(session: &Arc<Session>, message: Message, flush: bool) -> Result<()> {
    let sent = message.clone();
    let Some(bytes) = session.context().filters().encode(session, message)? else {
        return Ok(());
    };
    session.send(&bytes)?;
    let _ = session.fire(SessionEvent::Sent(sent));
    if flush {
        session.flush()?;
    }
    Ok(())
}
