//! Message splitters
//!
//! A splitter looks at the unconsumed bytes of a session's read channel
//! and says how long the next frame is. It never consumes anything
//! itself; the `MessageLoader` does that.
//!
//! `can_split` runs while the read channel is borrowed, so it must not
//! call back into the session's read channel.

use crate::filter::ByteFilter;
use crate::session::Session;

use nbio_buffer::index_of;

/// Frame boundary detection
pub trait MessageSplitter: Send + Sync {
    /// Length of the first complete frame in `data`, or `None` if more
    /// bytes are needed. `Some(0)` means "nothing to deliver yet".
    fn can_split(&self, session: &Session, data: &[u8]) -> Option<usize>;
}

/// Everything buffered is one message
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferSplitter;

impl MessageSplitter for TransferSplitter {
    fn can_split(&self, _session: &Session, data: &[u8]) -> Option<usize> {
        if data.is_empty() {
            None
        } else {
            Some(data.len())
        }
    }
}

/// Frames end with `\n` (kept in the frame)
#[derive(Debug, Default, Clone, Copy)]
pub struct LineSplitter;

impl MessageSplitter for LineSplitter {
    fn can_split(&self, _session: &Session, data: &[u8]) -> Option<usize> {
        data.iter().position(|&b| b == b'\n').map(|p| p + 1)
    }
}

/// Frames end with an arbitrary byte pattern (kept in the frame)
#[derive(Debug, Clone)]
pub struct DelimiterSplitter {
    delimiter: Vec<u8>,
}

impl DelimiterSplitter {
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl MessageSplitter for DelimiterSplitter {
    fn can_split(&self, _session: &Session, data: &[u8]) -> Option<usize> {
        if self.delimiter.is_empty() {
            return None;
        }
        index_of(data, &self.delimiter).map(|p| p + self.delimiter.len())
    }
}

/// Every frame is exactly `length` bytes
#[derive(Debug, Clone, Copy)]
pub struct FixedLengthSplitter {
    length: usize,
}

impl FixedLengthSplitter {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl MessageSplitter for FixedLengthSplitter {
    fn can_split(&self, _session: &Session, data: &[u8]) -> Option<usize> {
        if self.length > 0 && data.len() >= self.length {
            Some(self.length)
        } else {
            None
        }
    }
}

/// Width of a big-endian length field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    U16,
    U32,
}

impl LengthField {
    fn width(self) -> usize {
        match self {
            LengthField::U16 => 2,
            LengthField::U32 => 4,
        }
    }
}

/// Length-prefixed frames
///
/// ```text
///   ┌── offset ──┬─ length field ─┬──── value + adjustment ────┐
/// ```
///
/// The frame is `offset + width + value + adjustment` bytes, never less
/// than the header itself.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixSplitter {
    offset: usize,
    field: LengthField,
    adjustment: isize,
}

impl LengthPrefixSplitter {
    pub fn new(offset: usize, field: LengthField, adjustment: isize) -> Self {
        Self {
            offset,
            field,
            adjustment,
        }
    }

    /// Bare `u32` prefix, no offset
    pub fn u32() -> Self {
        Self::new(0, LengthField::U32, 0)
    }

    /// Bare `u16` prefix, no offset
    pub fn u16() -> Self {
        Self::new(0, LengthField::U16, 0)
    }
}

impl MessageSplitter for LengthPrefixSplitter {
    fn can_split(&self, _session: &Session, data: &[u8]) -> Option<usize> {
        let head = self.offset + self.field.width();
        let field = data.get(self.offset..head)?;
        let value = match self.field {
            LengthField::U16 => u16::from_be_bytes([field[0], field[1]]) as usize,
            LengthField::U32 => u32::from_be_bytes([field[0], field[1], field[2], field[3]]) as usize,
        };
        let total = (head + value) as isize + self.adjustment;
        let frame = (total.max(head as isize)) as usize;
        if data.len() >= frame {
            Some(frame)
        } else {
            None
        }
    }
}

/// Frames written by `ByteFilter`
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteFilterSplitter;

impl MessageSplitter for ByteFilterSplitter {
    fn can_split(&self, _session: &Session, data: &[u8]) -> Option<usize> {
        if data.len() < ByteFilter::HEAD_LEN {
            return None;
        }
        if data[0] != 0 {
            // Not a frame head: hand it over so the filter reports it
            return Some(data.len());
        }
        let len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        let frame = ByteFilter::HEAD_LEN.saturating_add(len);
        if data.len() >= frame {
            Some(frame)
        } else {
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
