//! Loopback fixtures for unit tests

use crate::config::NetConfig;
use crate::context::SocketContext;
use crate::handler::IoHandler;
use crate::message::Message;
use crate::session::Session;
use crate::splitter::MessageSplitter;
use crate::tls::TlsSide;

use nbio_runtime::EventRunner;

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Accepts everything, answers nothing
pub(crate) struct Quiet;

impl IoHandler for Quiet {
    fn on_receive(&self, _session: &Arc<Session>, _message: Message) -> Option<Message> {
        None
    }
}

/// Library-default config (no env) with `splitter`
pub(crate) fn context<S: MessageSplitter + 'static>(splitter: S) -> SocketContext {
    SocketContext::new(Quiet)
        .with_config(NetConfig::new())
        .with_splitter(splitter)
}

/// An unregistered server-side session, its loopback peer and its runner
pub(crate) struct Fixture {
    pub session: Arc<Session>,
    pub peer: TcpStream,
    pub runner: Arc<EventRunner>,
}

pub(crate) fn fixture(context: SocketContext) -> Fixture {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (stream, _) = listener.accept().unwrap();
    let runner = EventRunner::start(0, "test-session".into(), Duration::from_millis(2)).unwrap();
    let session = Session::new(stream, Arc::new(context), TlsSide::Server, &runner).unwrap();
    Fixture {
        session,
        peer,
        runner,
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.session.close();
        self.runner.shutdown();
    }
}
