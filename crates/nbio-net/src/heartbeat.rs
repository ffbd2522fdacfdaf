//! PING/PONG keepalive
//!
//! Runs on top of idle events. Each idle tick sends the ping marker and
//! checks that something came back since the previous tick:
//!
//! ```text
//!   idle ─► beat ─► received since last beat? ─ no ─► failed += 1 ─► close at max
//!                                               yes ─► failed = 0
//!                   send PING
//! ```
//!
//! Incoming markers are stripped from the head of the read channel before
//! the splitter runs; a PING is answered with PONG right away. Markers
//! that are not at the head are ordinary payload.

use crate::session::Session;

use nbio_core::error::Result;
use nbio_core::ntrace;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Markers and failure limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartBeatConfig {
    pub ping: Vec<u8>,
    pub pong: Vec<u8>,
    /// Consecutive silent beats before the session is closed
    pub max_failures: u32,
}

impl Default for HeartBeatConfig {
    fn default() -> Self {
        Self {
            ping: b"PING".to_vec(),
            pong: b"PONG".to_vec(),
            max_failures: 3,
        }
    }
}

impl HeartBeatConfig {
    pub fn new(ping: &[u8], pong: &[u8], max_failures: u32) -> Self {
        Self {
            ping: ping.to_vec(),
            pong: pong.to_vec(),
            max_failures,
        }
    }
}

/// Per-session heartbeat state
#[derive(Debug)]
pub struct HeartBeat {
    config: HeartBeatConfig,
    received: AtomicU32,
    failed: AtomicU32,
    first: AtomicBool,
}

impl HeartBeat {
    pub fn new(config: HeartBeatConfig) -> Self {
        Self {
            config,
            received: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            first: AtomicBool::new(true),
        }
    }

    /// Install on `session`; the first attachment wins
    pub fn attach(session: &Session, config: HeartBeatConfig) -> Arc<HeartBeat> {
        let heartbeat = Arc::new(HeartBeat::new(config));
        if session.set_heartbeat(Arc::clone(&heartbeat)) {
            heartbeat
        } else {
            session.heartbeat().cloned().unwrap_or(heartbeat)
        }
    }

    pub fn config(&self) -> &HeartBeatConfig {
        &self.config
    }

    /// Strip markers at the head of the read channel; returns how many
    pub fn intercept(&self, session: &Session) -> Result<usize> {
        let read = session.read_channel();
        let mut stripped = 0;
        loop {
            if !self.config.ping.is_empty() && read.starts_with(&self.config.ping)? {
                read.shrink_head(self.config.ping.len())?;
                session.send(&self.config.pong)?;
            } else if !self.config.pong.is_empty() && read.starts_with(&self.config.pong)? {
                read.shrink_head(self.config.pong.len())?;
            } else {
                break;
            }
            self.received.fetch_add(1, Ordering::AcqRel);
            stripped += 1;
        }
        if stripped > 0 {
            ntrace!("session {} heartbeat markers: {}", session.id(), stripped);
        }
        Ok(stripped)
    }

    /// One idle tick; false once the failure limit is reached
    pub fn beat(&self, session: &Session) -> Result<bool> {
        let heard = self.received.swap(0, Ordering::AcqRel) > 0;
        if self.first.swap(false, Ordering::AcqRel) || heard {
            self.failed.store(0, Ordering::Release);
        } else {
            let failed = self.failed.fetch_add(1, Ordering::AcqRel) + 1;
            if failed >= self.config.max_failures {
                return Ok(false);
            }
        }
        session.send(&self.config.ping)?;
        session.flush()?;
        Ok(true)
    }

    /// Consecutive beats without an answer
    pub fn failed_count(&self) -> u32 {
        self.failed.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::TransferSplitter;
    use crate::testutil;

    #[test]
    fn test_markers_stripped_from_head_only() {
        let fx = testutil::fixture(testutil::context(TransferSplitter));
        let hb = HeartBeat::attach(&fx.session, HeartBeatConfig::default());
        fx.session.read_channel().write_tail(b"PONGPONGdataPING").unwrap();
        assert_eq!(hb.intercept(&fx.session).unwrap(), 2);
        assert_eq!(fx.session.read_channel().to_vec().unwrap(), b"dataPING");
    }

    #[test]
    fn test_attach_keeps_first() {
        let fx = testutil::fixture(testutil::context(TransferSplitter));
        let a = HeartBeat::attach(&fx.session, HeartBeatConfig::default());
        let b = HeartBeat::attach(&fx.session, HeartBeatConfig::new(b"hi", b"yo", 1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().ping, b"PING");
    }

    #[test]
    fn test_failures_counted_until_limit() {
        let fx = testutil::fixture(testutil::context(TransferSplitter));
        let hb = HeartBeat::new(HeartBeatConfig::new(b"P", b"Q", 2));
        // Send from the test thread is routed through the runner
        assert!(hb.beat(&fx.session).unwrap());
        assert_eq!(hb.failed_count(), 0);
        assert!(hb.beat(&fx.session).unwrap());
        assert_eq!(hb.failed_count(), 1);
        assert!(!hb.beat(&fx.session).unwrap());
    }

    #[test]
    fn test_answer_resets_failures() {
        let fx = testutil::fixture(testutil::context(TransferSplitter));
        let hb = HeartBeat::new(HeartBeatConfig::new(b"P", b"Q", 5));
        hb.beat(&fx.session).unwrap();
        hb.beat(&fx.session).unwrap();
        assert_eq!(hb.failed_count(), 1);
        fx.session.read_channel().write_tail(b"Q").unwrap();
        hb.intercept(&fx.session).unwrap();
        hb.beat(&fx.session).unwrap();
        assert_eq!(hb.failed_count(), 0);
    }
}
