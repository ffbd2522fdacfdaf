//! TLS wrap/unwrap state machine
//!
//! ## Status
//!
//! | Status           | Condition                                     |
//! |------------------|-----------------------------------------------|
//! | `NeedTask`       | a record was fed and not processed yet        |
//! | `NeedWrap`       | the engine has records to send                |
//! | `NeedUnwrap`     | still handshaking, waiting for peer records   |
//! | `Finished`       | first query after the handshake completed     |
//! | `NotHandshaking` | every query after that                        |
//!
//! ## Records
//!
//! Bytes from the socket accumulate in the net channel. A record is fed
//! to the engine only once its 5-byte header is complete and the whole
//! declared payload is buffered. A header with an unknown content type
//! or an oversized length is rejected before anything is fed.

use crate::tls::TlsSide;

use nbio_buffer::BufferChannel;
use nbio_core::constants::{TLS_MAX_RECORD_PAYLOAD, TLS_RECORD_HEADER_LEN};
use nbio_core::error::{NetError, Result};
use nbio_core::ntrace;

use rustls::Connection;

use std::io::{self, Read, Write};

/// Scratch grows in steps of this size while draining plaintext
const PLAINTEXT_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NeedTask,
    NeedWrap,
    NeedUnwrap,
    Finished,
    NotHandshaking,
}

/// Outcome of one `drive_handshake` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// Waiting for more bytes from the peer
    NeedData,
    /// The handshake completed during this call (reported once)
    Completed,
    /// Already completed by an earlier call
    AlreadyDone,
}

/// One TLS endpoint over Buffer Channels
pub struct TlsParser {
    conn: Connection,
    side: TlsSide,
    /// Undecoded network bytes
    net: BufferChannel,
    /// Decrypted plaintext on its way to the caller
    decrypt: BufferChannel,
    records_pending: bool,
    handshake_done: bool,
    finished_reported: bool,
    peer_closed: bool,
    steps: u32,
    max_steps: u32,
}

impl TlsParser {
    pub fn new(
        conn: Connection,
        side: TlsSide,
        max_steps: u32,
        buffer_size: usize,
        max_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            conn,
            side,
            net: BufferChannel::with_max(buffer_size, max_size)?,
            decrypt: BufferChannel::with_max(buffer_size.min(max_size), max_size)?,
            records_pending: false,
            handshake_done: false,
            finished_reported: false,
            peer_closed: false,
            steps: 0,
            max_steps,
        })
    }

    pub fn side(&self) -> TlsSide {
        self.side
    }

    /// Append raw bytes read from the socket
    pub fn push_network(&mut self, bytes: &[u8]) -> Result<()> {
        self.net.write_tail(bytes)?;
        Ok(())
    }

    /// Buffered network bytes not yet fed to the engine
    pub fn network_pending(&self) -> usize {
        self.net.size()
    }

    pub fn is_handshake_done(&self) -> bool {
        self.handshake_done
    }

    /// The peer sent close_notify
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Handshake steps taken so far
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Current status; the `Finished` answer is given exactly once
    pub fn status(&mut self) -> HandshakeStatus {
        if self.records_pending {
            HandshakeStatus::NeedTask
        } else if self.conn.wants_write() {
            HandshakeStatus::NeedWrap
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else if !self.finished_reported {
            self.finished_reported = true;
            HandshakeStatus::Finished
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    /// Advance the handshake as far as the buffered bytes allow
    ///
    /// Outgoing handshake records are appended to `outbound`. Every
    /// task, wrap or unwrap counts as one step; the count carries across
    /// calls and exceeding the cap is a protocol error.
    pub fn drive_handshake(&mut self, outbound: &BufferChannel) -> Result<HandshakeProgress> {
        if self.handshake_done {
            return Ok(HandshakeProgress::AlreadyDone);
        }
        loop {
            let status = self.status();
            if matches!(status, HandshakeStatus::Finished | HandshakeStatus::NotHandshaking) {
                self.handshake_done = true;
                ntrace!("tls {:?} handshake done in {} steps", self.side, self.steps);
                return Ok(HandshakeProgress::Completed);
            }
            if status == HandshakeStatus::NeedUnwrap && self.next_record_len()?.is_none() {
                return Ok(HandshakeProgress::NeedData);
            }
            self.steps += 1;
            if self.steps > self.max_steps {
                return Err(NetError::protocol(format!(
                    "tls handshake exceeded {} steps",
                    self.max_steps
                )));
            }
            match status {
                HandshakeStatus::NeedTask => {
                    if let Err(e) = self.run_task() {
                        // Push the alert rustls queued, then fail
                        let _ = self.write_pending(outbound);
                        return Err(e);
                    }
                }
                HandshakeStatus::NeedWrap => {
                    self.write_pending(outbound)?;
                }
                HandshakeStatus::NeedUnwrap => {
                    self.feed_record()?;
                }
                HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => unreachable!(),
            }
        }
    }

    /// Encrypt `plain` and append the records to `outbound`
    ///
    /// Before the handshake completes rustls holds the plaintext and
    /// emits it once keys are available.
    pub fn wrap(&mut self, plain: &[u8], outbound: &BufferChannel) -> Result<usize> {
        self.conn.writer().write_all(plain)?;
        self.write_pending(outbound)?;
        Ok(plain.len())
    }

    /// Feed every complete buffered record and append the plaintext to
    /// `app_out`; returns the plaintext byte count
    pub fn unwrap(&mut self, app_out: &BufferChannel) -> Result<usize> {
        let mut total = self.drain_plaintext(app_out)?;
        while self.feed_record()? {
            self.run_task()?;
            total += self.drain_plaintext(app_out)?;
        }
        Ok(total)
    }

    /// Move queued records (alerts, tickets, key updates) to `outbound`
    pub fn write_pending(&mut self, outbound: &BufferChannel) -> Result<usize> {
        let mut total = 0;
        let mut out = outbound.writer();
        while self.conn.wants_write() {
            total += self.conn.write_tls(&mut out)?;
        }
        Ok(total)
    }

    /// Queue close_notify into `outbound`
    pub fn close(&mut self, outbound: &BufferChannel) -> Result<usize> {
        self.conn.send_close_notify();
        self.write_pending(outbound)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn run_task(&mut self) -> Result<()> {
        self.records_pending = false;
        let state = self
            .conn
            .process_new_packets()
            .map_err(|e| NetError::protocol(format!("tls: {}", e)))?;
        if state.peer_has_closed() {
            self.peer_closed = true;
        }
        Ok(())
    }

    /// Length of the first buffered record if it is complete
    fn next_record_len(&self) -> Result<Option<usize>> {
        if self.net.is_released() {
            return Err(NetError::Released);
        }
        let size = self.net.size();
        if size < TLS_RECORD_HEADER_LEN {
            return Ok(None);
        }
        let content_type = self.net.get(0)?;
        if !(20..=24).contains(&content_type) {
            return Err(NetError::protocol(format!(
                "tls record with unknown content type {}",
                content_type
            )));
        }
        let len = u16::from_be_bytes([self.net.get(3)?, self.net.get(4)?]) as usize;
        if len > TLS_MAX_RECORD_PAYLOAD {
            return Err(NetError::protocol(format!(
                "tls record length {} exceeds {}",
                len, TLS_MAX_RECORD_PAYLOAD
            )));
        }
        let total = TLS_RECORD_HEADER_LEN + len;
        Ok(if size >= total { Some(total) } else { None })
    }

    /// Hand one complete record to the engine; false if none is buffered
    fn feed_record(&mut self) -> Result<bool> {
        let len = match self.next_record_len()? {
            Some(len) => len,
            None => return Ok(false),
        };
        let mut view = self.net.borrow()?;
        let consumed = {
            let mut record: &[u8] = &view.data()[..len];
            while !record.is_empty() {
                if self.conn.read_tls(&mut record)? == 0 {
                    break;
                }
            }
            len - record.len()
        };
        view.advance(consumed)?;
        drop(view);
        if consumed < len {
            return Err(NetError::protocol("tls engine refused a buffered record"));
        }
        self.records_pending = true;
        Ok(true)
    }

    /// Plaintext from the engine, through the decrypt scratch, to `app_out`
    fn drain_plaintext(&mut self, app_out: &BufferChannel) -> Result<usize> {
        let mut total = 0;
        loop {
            let mut view = self.decrypt.borrow()?;
            view.reserve(PLAINTEXT_CHUNK)?;
            let n = match self.conn.reader().read(view.spare_mut()) {
                Ok(0) => {
                    self.peer_closed = true;
                    0
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Ok(total);
            }
            view.commit(n)?;
            app_out.write_tail(view.data())?;
            let len = view.len();
            view.advance(len)?;
            total += n;
        }
    }
}

impl std::fmt::Debug for TlsParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsParser")
            .field("side", &self.side)
            .field("handshake_done", &self.handshake_done)
            .field("steps", &self.steps)
            .field("max_steps", &self.max_steps)
            .field("net_pending", &self.net.size())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
