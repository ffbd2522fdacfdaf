//! Scoped zero-copy access to a `BufferChannel`
//!
//! A `Borrowed` guard exposes a cursor pair over the channel memory:
//!
//! ```text
//!   0        position            limit               capacity
//!   ├──consumed──┼─────data()──────┼─────spare_mut()──────┤
//! ```
//!
//! Callers consume from the front with `advance`, append in place with
//! `spare_mut` + `commit`, and grow with `reserve`. When the guard drops,
//! `[position, limit)` slides down to `[0, limit - position)`, the
//! channel size is updated, the borrowed flag is cleared and the lock (if
//! any) is released.

use crate::channel::{BufferChannel, Window};

use nbio_core::error::{BufferError, BufferResult};
use nbio_core::sync::ReentrantGuard;

use std::marker::PhantomData;

/// Borrow guard; reconciles the channel on drop
pub struct Borrowed<'a> {
    channel: &'a BufferChannel,
    position: usize,
    limit: usize,
    // Dropped after `Drop::drop` runs, so the lock outlives the reconcile
    _lock: Option<ReentrantGuard<'a>>,
    // Stays on the thread that passed the channel's owner check
    _not_send: PhantomData<*const ()>,
}

impl<'a> Borrowed<'a> {
    pub(crate) fn new(channel: &'a BufferChannel, size: usize, lock: Option<ReentrantGuard<'a>>) -> Self {
        Self {
            channel,
            position: 0,
            limit: size,
            _lock: lock,
            _not_send: PhantomData,
        }
    }

    #[allow(clippy::mut_from_ref)]
    #[inline]
    fn window(&self) -> &mut Window {
        // Safety: the borrowed flag shuts out every other channel
        // operation, and thread-safe mode keeps the lock for our lifetime.
        // Callers never hold two of these references at once.
        unsafe { self.channel.window() }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Unconsumed bytes in the window
    #[inline]
    pub fn len(&self) -> usize {
        self.limit - self.position
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.limit == self.position
    }

    pub fn capacity(&self) -> usize {
        self.window().buf.capacity()
    }

    /// `[position, limit)`
    pub fn data(&self) -> &[u8] {
        let (p, l) = (self.position, self.limit);
        // Range is always within capacity
        self.window().buf.slice(p..l).unwrap_or(&[])
    }

    /// `[position, limit)`, writable in place
    pub fn data_mut(&mut self) -> &mut [u8] {
        let (p, l) = (self.position, self.limit);
        self.window().buf.slice_mut(p..l).unwrap_or(&mut [])
    }

    /// Mark `n` bytes at the front as consumed
    pub fn advance(&mut self, n: usize) -> BufferResult<()> {
        if n > self.len() {
            return Err(BufferError::OutOfBounds {
                offset: self.position,
                len: n,
                size: self.limit,
            });
        }
        self.position += n;
        Ok(())
    }

    pub fn set_position(&mut self, position: usize) -> BufferResult<()> {
        if position > self.limit {
            return Err(BufferError::OutOfBounds {
                offset: position,
                len: 0,
                size: self.limit,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Move the limit; may extend into already-written spare space
    pub fn set_limit(&mut self, limit: usize) -> BufferResult<()> {
        if limit < self.position || limit > self.capacity() {
            return Err(BufferError::OutOfBounds {
                offset: limit,
                len: 0,
                size: self.capacity(),
            });
        }
        self.limit = limit;
        Ok(())
    }

    /// `[limit, capacity)` for in-place appends; follow with `commit`
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let l = self.limit;
        let w = self.window();
        let cap = w.buf.capacity();
        w.buf.slice_mut(l..cap).unwrap_or(&mut [])
    }

    /// Extend the window over `n` bytes written through `spare_mut`
    pub fn commit(&mut self, n: usize) -> BufferResult<()> {
        let cap = self.capacity();
        if self.limit + n > cap {
            return Err(BufferError::OutOfBounds {
                offset: self.limit,
                len: n,
                size: cap,
            });
        }
        self.limit += n;
        Ok(())
    }

    /// Ensure `spare_mut` offers at least `additional` bytes
    ///
    /// Consumed bytes are slid out first so growth only happens when the
    /// live data really needs it. Bounded by the channel's max size.
    pub fn reserve(&mut self, additional: usize) -> BufferResult<()> {
        if self.capacity() - self.limit >= additional {
            return Ok(());
        }
        let (p, l) = (self.position, self.limit);
        let w = self.window();
        if p > 0 {
            w.buf.move_bytes(p, 0, l - p)?;
        }
        self.limit -= p;
        self.position = 0;
        let needed = self.limit + additional;
        self.window().ensure_capacity(needed)
    }

    /// End the borrow now; same as dropping the guard
    pub fn finish(self) {}
}

impl Drop for Borrowed<'_> {
    fn drop(&mut self) {
        let (p, l) = (self.position, self.limit);
        let w = self.window();
        let remaining = l - p;
        if p > 0 && remaining > 0 {
            // In-bounds by construction; a failure here would mean the
            // buffer was released underneath us, which `release` forbids.
            let _ = w.buf.move_bytes(p, 0, remaining);
        }
        w.size = remaining;
        w.borrowed = false;
        self.channel.publish(w);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::channel::BufferChannel;
    use crate::native::MemoryStats;
    use std::sync::Arc;

    fn channel(cap: usize, max: usize) -> BufferChannel {
        BufferChannel::with_stats(cap, max, Arc::new(MemoryStats::new())).unwrap()
    }

    #[test]
    fn test_advance_then_reconcile() {
        let ch = channel(16, 64);
        ch.write_tail(b"0123456789").unwrap();
        let mut view = ch.borrow().unwrap();
        view.advance(4).unwrap();
        assert_eq!(view.data(), b"456789");
        assert!(view.advance(7).is_err());
        view.finish();
        assert_eq!(ch.to_vec().unwrap(), b"456789");
    }

    #[test]
    fn test_spare_and_commit() {
        let ch = channel(4, 64);
        ch.write_tail(b"ab").unwrap();
        {
            let mut view = ch.borrow().unwrap();
            view.reserve(10).unwrap();
            assert!(view.spare_mut().len() >= 10);
            view.spare_mut()[..3].copy_from_slice(b"cde");
            view.commit(3).unwrap();
            assert_eq!(view.data(), b"abcde");
        }
        assert_eq!(ch.size(), 5);
        assert_eq!(ch.to_vec().unwrap(), b"abcde");
    }

    #[test]
    fn test_reserve_respects_max_size() {
        let ch = channel(4, 8);
        ch.write_tail(b"abcd").unwrap();
        let mut view = ch.borrow().unwrap();
        assert!(view.reserve(5).is_err());
        view.advance(2).unwrap();
        // consumed bytes are reclaimed before growing
        view.reserve(6).unwrap();
        assert_eq!(view.position(), 0);
        assert_eq!(view.data(), b"cd");
        drop(view);
        assert_eq!(ch.to_vec().unwrap(), b"cd");
        assert!(ch.capacity() <= 8);
    }

    #[test]
    fn test_in_place_transform() {
        let ch = channel(8, 64);
        ch.write_tail(b"shout").unwrap();
        {
            let mut view = ch.borrow().unwrap();
            view.data_mut().make_ascii_uppercase();
            let end = view.limit() - 1;
            view.set_limit(end).unwrap();
        }
        assert_eq!(ch.to_vec().unwrap(), b"SHOU");
    }

    #[test]
    fn test_drop_on_panic_unwinds_borrow() {
        let ch = channel(8, 64);
        ch.write_tail(b"xyz").unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut view = ch.borrow().unwrap();
            view.advance(1).unwrap();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert!(!ch.is_borrowed());
        assert_eq!(ch.to_vec().unwrap(), b"yz");
    }
}
