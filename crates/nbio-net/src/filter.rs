//! Filters
//!
//! A `FilterChain` sits between the splitter and the handler:
//!
//! ```text
//!   frame ─► decode f0 ─► decode f1 ─► ... ─► handler.on_receive
//!   bytes ◄─ encode f0 ◄─ encode f1 ◄─ ... ◄─ reply
//! ```
//!
//! Returning `None` from any stage drops the message. The final encoded
//! value must be `Bytes` or `Text`.

use crate::message::Message;
use crate::session::Session;

use nbio_core::error::{NetError, Result};

use std::sync::Arc;

/// One decode/encode stage
pub trait IoFilter: Send + Sync {
    fn decode(&self, session: &Session, message: Message) -> Result<Option<Message>>;

    fn encode(&self, session: &Session, message: Message) -> Result<Option<Message>>;
}

/// Ordered list of filters; cheap to clone
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn IoFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F: IoFilter + 'static>(&mut self, filter: F) {
        self.filters.push(Arc::new(filter));
    }

    /// Builder form of `push`
    pub fn with<F: IoFilter + 'static>(mut self, filter: F) -> Self {
        self.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Head to tail
    pub fn decode(&self, session: &Session, message: Message) -> Result<Option<Message>> {
        let mut current = message;
        for filter in &self.filters {
            match filter.decode(session, current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Tail to head, then down to wire bytes
    pub fn encode(&self, session: &Session, message: Message) -> Result<Option<Vec<u8>>> {
        let mut current = message;
        for filter in self.filters.iter().rev() {
            match filter.encode(session, current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        current
            .into_bytes()
            .map(Some)
            .map_err(|m| NetError::protocol(format!("filter chain produced {:?}, expected bytes or text", m)))
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain").field("filters", &self.filters.len()).finish()
    }
}

// ============================================================================
// Built-in filters
// ============================================================================

/// Bytes in, UTF-8 text out; text back to bytes on the way out
#[derive(Debug, Default, Clone, Copy)]
pub struct StringFilter;

impl IoFilter for StringFilter {
    fn decode(&self, _session: &Session, message: Message) -> Result<Option<Message>> {
        match message {
            Message::Bytes(b) => String::from_utf8(b)
                .map(|s| Some(Message::Text(s)))
                .map_err(|e| NetError::protocol(format!("invalid UTF-8 in frame: {}", e))),
            other => Ok(Some(other)),
        }
    }

    fn encode(&self, _session: &Session, message: Message) -> Result<Option<Message>> {
        match message {
            Message::Text(s) => Ok(Some(Message::Bytes(s.into_bytes()))),
            other => Ok(Some(other)),
        }
    }
}

/// Length-framed binary messages
///
/// Wire layout (6-byte head):
///
/// ```text
///   ┌──────┬────────────────┬──────┬───────────────┐
///   │ 0x00 │ u32 BE length  │ 0x00 │ payload ...   │
///   └──────┴────────────────┴──────┴───────────────┘
/// ```
///
/// Pair it with `ByteFilterSplitter`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteFilter;

impl ByteFilter {
    pub const HEAD_LEN: usize = 6;

    pub fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEAD_LEN + payload.len());
        out.push(0);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.push(0);
        out.extend_from_slice(payload);
        out
    }

    pub fn unframe(frame: &[u8]) -> Result<Option<Vec<u8>>> {
        if frame.len() < Self::HEAD_LEN {
            return Err(NetError::protocol(format!(
                "byte frame too short: {} bytes",
                frame.len()
            )));
        }
        if frame[0] != 0 || frame[5] != 0 {
            return Err(NetError::protocol("byte frame markers missing"));
        }
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        if len == 0 {
            return Ok(None);
        }
        let payload = frame
            .get(Self::HEAD_LEN..Self::HEAD_LEN + len)
            .ok_or_else(|| NetError::protocol(format!("byte frame truncated: want {} payload bytes", len)))?;
        Ok(Some(payload.to_vec()))
    }
}

impl IoFilter for ByteFilter {
    fn decode(&self, _session: &Session, message: Message) -> Result<Option<Message>> {
        match message {
            Message::Bytes(b) => Ok(Self::unframe(&b)?.map(Message::Bytes)),
            other => Ok(Some(other)),
        }
    }

    fn encode(&self, _session: &Session, message: Message) -> Result<Option<Message>> {
        match message.into_bytes() {
            Ok(b) => Ok(Some(Message::Bytes(Self::frame(&b)))),
            Err(other) => Ok(Some(other)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
