//! Message loader
//!
//! Cuts frames off the head of a session's read channel:
//!
//! ```text
//!   read channel ──borrow──► splitter.can_split(data) ──► Some(n) ──► copy n, advance n
//!                                                     └─► None    ──► wait for more bytes
//! ```
//!
//! Once the peer has gone (`StreamEnd` / `SocketClosed`) whatever the
//! splitter cannot frame is delivered as one last frame.

use crate::session::Session;

use nbio_core::error::{NetError, Result, TimeoutKind};
use nbio_core::ntrace;

/// Why the loader last stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Running,
    /// Local close
    SocketClosed,
    /// Peer sent end-of-stream
    StreamEnd,
    /// A frame was cut
    Split,
    Exception,
}

/// Per-session framing state
#[derive(Debug)]
pub struct MessageLoader {
    stop: StopReason,
    empty_reads: u32,
    max_empty_reads: u32,
}

impl MessageLoader {
    pub fn new(max_empty_reads: u32) -> Self {
        Self {
            stop: StopReason::Running,
            empty_reads: 0,
            max_empty_reads,
        }
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop
    }

    pub fn set_stop_reason(&mut self, reason: StopReason) {
        // End-of-stream and close stick; later splits do not hide them
        if !self.is_finished() || matches!(reason, StopReason::SocketClosed | StopReason::Exception) {
            self.stop = reason;
        }
    }

    /// The peer is gone or the session is closing
    pub fn is_finished(&self) -> bool {
        matches!(
            self.stop,
            StopReason::StreamEnd | StopReason::SocketClosed | StopReason::Exception
        )
    }

    /// Account one readiness event that yielded `bytes`
    ///
    /// `max_empty_reads` consecutive zero-byte reads is a timeout; zero
    /// disables the check.
    pub fn record_read(&mut self, bytes: usize) -> Result<()> {
        if bytes > 0 {
            self.empty_reads = 0;
            return Ok(());
        }
        self.empty_reads += 1;
        if self.max_empty_reads > 0 && self.empty_reads >= self.max_empty_reads {
            self.stop = StopReason::Exception;
            return Err(NetError::Timeout(TimeoutKind::EmptyRead));
        }
        Ok(())
    }

    pub fn empty_reads(&self) -> u32 {
        self.empty_reads
    }
}

/// Cut the next frame from `session`'s read channel
///
/// `Ok(None)` means no complete frame yet (or a zero-length answer from
/// the splitter). The splitter runs under the channel borrow, so the
/// loader lock is not held at that point.
pub fn next_frame(session: &Session) -> Result<Option<Vec<u8>>> {
    let finished = session.loader().lock().is_finished();
    let splitter = session.context().splitter();

    let mut view = session.read_channel().borrow()?;
    if view.is_empty() {
        return Ok(None);
    }
    let available = view.len();
    let len = match splitter.can_split(session, view.data()) {
        Some(0) => return Ok(None),
        Some(n) if n > available => {
            return Err(NetError::protocol(format!(
                "splitter asked for {} bytes, only {} buffered",
                n, available
            )));
        }
        Some(n) => n,
        None if finished => available,
        None => return Ok(None),
    };
    let frame = view.data()[..len].to_vec();
    view.advance(len)?;
    drop(view);

    session.loader().lock().set_stop_reason(StopReason::Split);
    ntrace!("session {} framed {} bytes", session.id(), len);
    Ok(Some(frame))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::{LineSplitter, MessageSplitter};
    use crate::testutil;

    #[test]
    fn test_empty_read_limit() {
        let mut loader = MessageLoader::new(3);
        loader.record_read(0).unwrap();
        loader.record_read(0).unwrap();
        loader.record_read(5).unwrap();
        assert_eq!(loader.empty_reads(), 0);
        loader.record_read(0).unwrap();
        loader.record_read(0).unwrap();
        assert_eq!(
            loader.record_read(0),
            Err(NetError::Timeout(TimeoutKind::EmptyRead))
        );
        assert_eq!(loader.stop_reason(), StopReason::Exception);
    }

    #[test]
    fn test_zero_limit_disables_check() {
        let mut loader = MessageLoader::new(0);
        for _ in 0..1000 {
            loader.record_read(0).unwrap();
        }
    }

    #[test]
    fn test_stream_end_sticks() {
        let mut loader = MessageLoader::new(0);
        loader.set_stop_reason(StopReason::StreamEnd);
        loader.set_stop_reason(StopReason::Split);
        assert_eq!(loader.stop_reason(), StopReason::StreamEnd);
        loader.set_stop_reason(StopReason::SocketClosed);
        assert_eq!(loader.stop_reason(), StopReason::SocketClosed);
    }

    #[test]
    fn test_lines_are_cut_in_order() {
        let fx = testutil::fixture(testutil::context(LineSplitter));
        fx.session.read_channel().write_tail(b"abc\ndef\ngh").unwrap();
        assert_eq!(next_frame(&fx.session).unwrap(), Some(b"abc\n".to_vec()));
        assert_eq!(next_frame(&fx.session).unwrap(), Some(b"def\n".to_vec()));
        assert_eq!(next_frame(&fx.session).unwrap(), None);
        assert_eq!(fx.session.read_channel().to_vec().unwrap(), b"gh");
        assert_eq!(fx.session.loader().lock().stop_reason(), StopReason::Split);
    }

    #[test]
    fn test_remainder_delivered_at_stream_end() {
        let fx = testutil::fixture(testutil::context(LineSplitter));
        fx.session.read_channel().write_tail(b"tail").unwrap();
        assert_eq!(next_frame(&fx.session).unwrap(), None);
        fx.session.loader().lock().set_stop_reason(StopReason::StreamEnd);
        assert_eq!(next_frame(&fx.session).unwrap(), Some(b"tail".to_vec()));
        assert_eq!(next_frame(&fx.session).unwrap(), None);
    }

    struct Greedy;

    impl MessageSplitter for Greedy {
        fn can_split(&self, _session: &Session, data: &[u8]) -> Option<usize> {
            Some(data.len() + 1)
        }
    }

    struct Nothing;

    impl MessageSplitter for Nothing {
        fn can_split(&self, _session: &Session, _data: &[u8]) -> Option<usize> {
            Some(0)
        }
    }

    #[test]
    fn test_oversized_split_is_protocol_error() {
        let fx = testutil::fixture(testutil::context(Greedy));
        fx.session.read_channel().write_tail(b"xy").unwrap();
        assert!(matches!(next_frame(&fx.session), Err(NetError::Protocol(_))));
        // the borrow ended cleanly and nothing was consumed
        assert_eq!(fx.session.read_channel().to_vec().unwrap(), b"xy");
    }

    #[test]
    fn test_zero_length_split_delivers_nothing() {
        let fx = testutil::fixture(testutil::context(Nothing));
        fx.session.read_channel().write_tail(b"xy").unwrap();
        assert_eq!(next_frame(&fx.session).unwrap(), None);
        assert_eq!(fx.session.read_channel().size(), 2);
    }
}
