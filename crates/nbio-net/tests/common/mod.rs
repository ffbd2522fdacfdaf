//! Shared pieces for the loopback integration tests
#![allow(dead_code)]

use nbio_core::error::NetError;
use nbio_net::{IoHandler, Message, NetConfig, Session};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const CA: &[u8] = include_bytes!("../certs/ca.pem");
pub const CERT: &[u8] = include_bytes!("../certs/server.pem");
pub const KEY: &[u8] = include_bytes!("../certs/server.key");

/// Library defaults with small pools and a short poll
pub fn config() -> NetConfig {
    NetConfig::new()
        .io_threads(2)
        .select_interval(Duration::from_millis(5))
        .check_interval(Duration::from_millis(10))
}

/// Poll `cond` for up to five seconds
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Records every callback; optionally echoes, replies or closes on a keyword
#[derive(Default)]
pub struct Recorder {
    pub echo: bool,
    pub reply: Option<Vec<u8>>,
    pub close_on: Option<Vec<u8>>,
    /// "connect" / "receive" in callback order
    pub order: Mutex<Vec<&'static str>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub idles: AtomicUsize,
    pub sent: AtomicUsize,
    pub received: Mutex<Vec<Message>>,
    pub exceptions: Mutex<Vec<NetError>>,
    pub close_results: Mutex<Vec<bool>>,
}

impl Recorder {
    pub fn echo() -> Arc<Self> {
        Arc::new(Self {
            echo: true,
            ..Self::default()
        })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers every message with `reply`
    pub fn replying(reply: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply),
            ..Self::default()
        })
    }

    pub fn order(&self) -> Vec<&'static str> {
        self.order.lock().unwrap().clone()
    }

    pub fn closing_on(word: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            close_on: Some(word.to_vec()),
            ..Self::default()
        })
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_bytes(&self) -> Vec<u8> {
        self.received()
            .iter()
            .filter_map(|m| m.as_bytes().map(<[u8]>::to_vec))
            .flatten()
            .collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl IoHandler for Recorder {
    fn on_connect(&self, _session: &Arc<Session>) -> Option<Message> {
        self.order.lock().unwrap().push("connect");
        self.connects.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn on_disconnect(&self, _session: &Arc<Session>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_receive(&self, session: &Arc<Session>, message: Message) -> Option<Message> {
        self.order.lock().unwrap().push("receive");
        if let (Some(word), Some(bytes)) = (&self.close_on, message.as_bytes()) {
            if bytes == word.as_slice() {
                let first = session.close();
                let second = session.close();
                self.close_results.lock().unwrap().extend([first, second]);
                return None;
            }
        }
        self.received.lock().unwrap().push(message.clone());
        if let Some(reply) = &self.reply {
            return Some(Message::Bytes(reply.clone()));
        }
        if self.echo {
            Some(message)
        } else {
            None
        }
    }

    fn on_sent(&self, _session: &Arc<Session>, _message: &Message) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exception(&self, _session: &Arc<Session>, error: &NetError) {
        self.exceptions.lock().unwrap().push(error.clone());
    }

    fn on_idle(&self, _session: &Arc<Session>) {
        self.idles.fetch_add(1, Ordering::SeqCst);
    }
}
