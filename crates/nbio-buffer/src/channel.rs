//! Buffer Channel
//!
//! A growable, double-ended byte queue over one `NativeBuffer`. Valid
//! bytes always occupy `[0, size)`; reads and writes at the head slide the
//! window with an overlapping move.
//!
//! ## Invariant
//!
//! `0 <= size <= capacity <= max_size` at every observable point. A write
//! that would need more than `max_size` fails with `TooLarge` and leaves
//! the channel untouched.
//!
//! ## Threading
//!
//! By default no synchronization is performed. The first thread to run an
//! operation becomes the channel's owner and any other thread gets
//! `WrongThread`; a session's channels are owned by its runner thread.
//! `set_thread_safe(true)` turns on a reentrant lock around every operation
//! (and around the whole lifetime of a borrow guard) so a foreign thread
//! may append while the runner drains.
//!
//! Queries (`size`, `capacity`, `available`, ...) read a published copy of
//! the window kept in atomics, so they are answered on any thread and never
//! take the lock.

use crate::borrow::Borrowed;
use crate::native::{MemoryStats, NativeBuffer};
use crate::search;

use nbio_core::constants::DEFAULT_MAX_CHANNEL_SIZE;
use nbio_core::error::{BufferError, BufferResult};
use nbio_core::sync::{ReentrantGuard, ReentrantLock};

use std::cell::UnsafeCell;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `size()` of a released channel
pub const RELEASED: usize = usize::MAX;

static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Unique for the life of the process
    static THREAD_TOKEN: usize = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn thread_token() -> usize {
    THREAD_TOKEN.with(|t| *t)
}

/// Mutable channel state; only reached through `BufferChannel::window`
pub(crate) struct Window {
    pub(crate) buf: NativeBuffer,
    pub(crate) size: usize,
    pub(crate) max_size: usize,
    pub(crate) borrowed: bool,
}

impl Window {
    #[inline]
    pub(crate) fn check_usable(&self) -> BufferResult<()> {
        if self.buf.is_released() {
            Err(BufferError::Released)
        } else if self.borrowed {
            Err(BufferError::Borrowed)
        } else {
            Ok(())
        }
    }

    /// Grow so at least `needed` bytes fit: double, or exact fit, capped
    /// at `max_size`
    pub(crate) fn ensure_capacity(&mut self, needed: usize) -> BufferResult<()> {
        let cap = self.buf.capacity();
        if needed <= cap {
            return Ok(());
        }
        if needed > self.max_size {
            return Err(BufferError::TooLarge {
                requested: needed,
                max_size: self.max_size,
            });
        }
        let new_cap = cap.saturating_mul(2).max(needed).min(self.max_size);
        self.buf.reallocate(new_cap)
    }

    fn remove(&mut self, offset: usize, len: usize) -> BufferResult<()> {
        let tail = self.size - offset - len;
        self.buf.move_bytes(offset + len, offset, tail)?;
        self.size -= len;
        Ok(())
    }

    fn out_of_bounds(&self, offset: usize, len: usize) -> BufferError {
        BufferError::OutOfBounds {
            offset,
            len,
            size: self.size,
        }
    }
}

/// Window state as last left by an operation, readable from any thread
struct Published {
    size: AtomicUsize,
    capacity: AtomicUsize,
    max_size: AtomicUsize,
    borrowed: AtomicBool,
}

/// Growable double-ended byte channel over native memory
pub struct BufferChannel {
    window: UnsafeCell<Window>,
    lock: ReentrantLock,
    thread_safe: bool,
    /// Token of the thread allowed in without the lock; 0 until claimed
    owner: AtomicUsize,
    published: Published,
}

// Safety: `window` is only reached through `enter`, which either takes
// `lock` (thread-safe mode) or admits the single owner thread. The mode
// changes only through `&mut self`.
unsafe impl Send for BufferChannel {}
unsafe impl Sync for BufferChannel {}

impl BufferChannel {
    /// Channel with the default 2 MB max size and the global stats context
    pub fn new(capacity: usize) -> BufferResult<Self> {
        Self::with_max(capacity, DEFAULT_MAX_CHANNEL_SIZE.max(capacity))
    }

    pub fn with_max(capacity: usize, max_size: usize) -> BufferResult<Self> {
        Self::with_stats(capacity, max_size, MemoryStats::global())
    }

    pub fn with_stats(capacity: usize, max_size: usize, stats: Arc<MemoryStats>) -> BufferResult<Self> {
        if capacity > max_size {
            return Err(BufferError::TooLarge {
                requested: capacity,
                max_size,
            });
        }
        let buf = NativeBuffer::allocate(capacity, stats)?;
        Ok(Self {
            published: Published {
                size: AtomicUsize::new(0),
                capacity: AtomicUsize::new(buf.capacity()),
                max_size: AtomicUsize::new(max_size),
                borrowed: AtomicBool::new(false),
            },
            window: UnsafeCell::new(Window {
                buf,
                size: 0,
                max_size,
                borrowed: false,
            }),
            lock: ReentrantLock::new(),
            thread_safe: false,
            owner: AtomicUsize::new(0),
        })
    }

    // ── Locking ──────────────────────────────────────────────────────────

    /// Gate for every window access
    ///
    /// Thread-safe mode takes the lock. Otherwise the calling thread must
    /// be the owner; the first caller claims ownership.
    #[inline]
    pub(crate) fn enter(&self) -> BufferResult<Option<ReentrantGuard<'_>>> {
        if self.thread_safe {
            return Ok(Some(self.lock.lock()));
        }
        let me = thread_token();
        let owner = self.owner.load(Ordering::Acquire);
        if owner == me {
            return Ok(None);
        }
        if owner == 0
            && self
                .owner
                .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Ok(None);
        }
        Err(BufferError::WrongThread)
    }

    /// Copy the window into the atomics the queries read
    #[inline]
    pub(crate) fn publish(&self, w: &Window) {
        let size = if w.buf.is_released() { RELEASED } else { w.size };
        // SeqCst pairs with the session flush flag; see `SessionFlags::end_flush`
        self.published.size.store(size, Ordering::SeqCst);
        self.published.capacity.store(w.buf.capacity(), Ordering::Release);
        self.published.max_size.store(w.max_size, Ordering::Release);
        self.published.borrowed.store(w.borrowed, Ordering::Release);
    }

    /// # Safety
    ///
    /// Caller got `Ok` from `enter` (and holds the guard it returned), and
    /// drops the reference before calling back into the channel.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn window(&self) -> &mut Window {
        &mut *self.window.get()
    }

    /// Run `f` on the window after the released/borrowed checks
    #[inline]
    fn with_window<R>(&self, f: impl FnOnce(&mut Window) -> BufferResult<R>) -> BufferResult<R> {
        let _guard = self.enter()?;
        // Safety: entered; reference is scoped to f
        let w = unsafe { self.window() };
        w.check_usable()?;
        let result = f(&mut *w);
        self.publish(w);
        result
    }

    /// Switch the lock on or off
    ///
    /// Turning it off hands the channel to whichever thread uses it next.
    pub fn set_thread_safe(&mut self, enabled: bool) {
        self.thread_safe = enabled;
        *self.owner.get_mut() = 0;
    }

    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Valid bytes, or `RELEASED` after `release()`
    ///
    /// While a borrow is outstanding this is the size at borrow time.
    pub fn size(&self) -> usize {
        self.published.size.load(Ordering::SeqCst)
    }

    /// Current allocation size (0 after release)
    pub fn capacity(&self) -> usize {
        self.published.capacity.load(Ordering::Acquire)
    }

    pub fn max_size(&self) -> usize {
        self.published.max_size.load(Ordering::Acquire)
    }

    /// Bytes that may still be written before hitting `max_size`
    pub fn available(&self) -> usize {
        match self.size() {
            RELEASED => 0,
            size => self.max_size().saturating_sub(size),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available() == 0 && !self.is_released()
    }

    pub fn is_borrowed(&self) -> bool {
        self.published.borrowed.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.size() == RELEASED
    }

    /// Raise (never lower below capacity) the growth bound
    pub fn set_max_size(&self, max_size: usize) -> BufferResult<()> {
        self.with_window(|w| {
            if max_size < w.buf.capacity() {
                return Err(BufferError::TooLarge {
                    requested: w.buf.capacity(),
                    max_size,
                });
            }
            w.max_size = max_size;
            Ok(())
        })
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Append at the tail
    pub fn write_tail(&self, bytes: &[u8]) -> BufferResult<usize> {
        self.with_window(|w| {
            if bytes.is_empty() {
                return Ok(0);
            }
            let end = w.size + bytes.len();
            w.ensure_capacity(end)?;
            w.buf.copy_in(w.size, bytes)?;
            w.size = end;
            Ok(bytes.len())
        })
    }

    /// Prepend at the head
    pub fn write_head(&self, bytes: &[u8]) -> BufferResult<usize> {
        self.write_at(0, bytes)
    }

    /// Insert at `pos`, shifting `[pos, size)` right
    pub fn write_at(&self, pos: usize, bytes: &[u8]) -> BufferResult<usize> {
        self.with_window(|w| {
            if pos > w.size {
                return Err(w.out_of_bounds(pos, bytes.len()));
            }
            if bytes.is_empty() {
                return Ok(0);
            }
            let len = bytes.len();
            w.ensure_capacity(w.size + len)?;
            w.buf.move_bytes(pos, pos + len, w.size - pos)?;
            w.buf.copy_in(pos, bytes)?;
            w.size += len;
            Ok(len)
        })
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Remove up to `dst.len()` bytes from the head
    pub fn read_head(&self, dst: &mut [u8]) -> BufferResult<usize> {
        self.read_at(0, dst)
    }

    /// Remove up to `dst.len()` bytes from the tail
    pub fn read_tail(&self, dst: &mut [u8]) -> BufferResult<usize> {
        self.with_window(|w| {
            let n = dst.len().min(w.size);
            w.buf.copy_out(w.size - n, &mut dst[..n])?;
            w.size -= n;
            Ok(n)
        })
    }

    /// Remove up to `dst.len()` bytes starting at `pos`
    pub fn read_at(&self, pos: usize, dst: &mut [u8]) -> BufferResult<usize> {
        self.with_window(|w| {
            if pos > w.size {
                return Err(w.out_of_bounds(pos, dst.len()));
            }
            let n = dst.len().min(w.size - pos);
            w.buf.copy_out(pos, &mut dst[..n])?;
            w.remove(pos, n)?;
            Ok(n)
        })
    }

    /// Remove and return exactly `len` head bytes
    pub fn take_head(&self, len: usize) -> BufferResult<Vec<u8>> {
        self.with_window(|w| {
            if len > w.size {
                return Err(w.out_of_bounds(0, len));
            }
            let mut out = vec![0u8; len];
            w.buf.copy_out(0, &mut out)?;
            w.remove(0, len)?;
            Ok(out)
        })
    }

    /// Byte at `index` without consuming it
    pub fn get(&self, index: usize) -> BufferResult<u8> {
        self.with_window(|w| {
            if index >= w.size {
                return Err(w.out_of_bounds(index, 1));
            }
            Ok(w.buf.slice(index..index + 1)?[0])
        })
    }

    /// Copy of the valid bytes
    pub fn to_vec(&self) -> BufferResult<Vec<u8>> {
        self.with_window(|w| Ok(w.buf.slice(0..w.size)?.to_vec()))
    }

    /// Drop all bytes, keep the allocation
    pub fn clear(&self) -> BufferResult<()> {
        self.with_window(|w| {
            w.size = 0;
            Ok(())
        })
    }

    // ── Shrink ───────────────────────────────────────────────────────────

    /// Remove `|length|` bytes at `offset`
    ///
    /// A positive `length` removes `[offset, offset + length)`; a negative
    /// one removes `[offset - |length|, offset)`. Either range is clipped to
    /// the content, and an empty channel is left alone. Returns the byte
    /// count removed; only an `offset` past the content is an error.
    pub fn shrink(&self, offset: usize, length: isize) -> BufferResult<usize> {
        self.with_window(|w| {
            if w.size == 0 {
                return Ok(0);
            }
            if offset > w.size {
                return Err(w.out_of_bounds(offset, length.unsigned_abs()));
            }
            let (start, len) = if length >= 0 {
                (offset, length.unsigned_abs().min(w.size - offset))
            } else {
                let len = length.unsigned_abs().min(offset);
                (offset - len, len)
            };
            w.remove(start, len)?;
            Ok(len)
        })
    }

    /// Drop `n` bytes from the head
    pub fn shrink_head(&self, n: usize) -> BufferResult<usize> {
        self.shrink(0, n as isize)
    }

    /// Drop up to `n` bytes from the tail
    pub fn shrink_tail(&self, n: usize) -> BufferResult<usize> {
        self.with_window(|w| {
            let n = n.min(w.size);
            w.size -= n;
            Ok(n)
        })
    }

    // ── Search ───────────────────────────────────────────────────────────

    /// First index of `pattern` in `[0, size)`; content is untouched
    pub fn index_of(&self, pattern: &[u8]) -> BufferResult<Option<usize>> {
        self.with_window(|w| Ok(search::index_of(w.buf.slice(0..w.size)?, pattern)))
    }

    pub fn starts_with(&self, prefix: &[u8]) -> BufferResult<bool> {
        self.with_window(|w| Ok(w.buf.slice(0..w.size)?.starts_with(prefix)))
    }

    /// Remove and return bytes through the next `\n` (inclusive)
    pub fn read_line(&self) -> BufferResult<Option<String>> {
        self.with_window(|w| {
            let pos = match search::index_of(w.buf.slice(0..w.size)?, b"\n") {
                Some(p) => p,
                None => return Ok(None),
            };
            let line = String::from_utf8_lossy(w.buf.slice(0..pos + 1)?).into_owned();
            w.remove(0, pos + 1)?;
            Ok(Some(line))
        })
    }

    /// Remove and return bytes before `delimiter`; the delimiter is dropped
    pub fn read_with_split(&self, delimiter: &[u8]) -> BufferResult<Option<Vec<u8>>> {
        self.with_window(|w| {
            let pos = match search::index_of(w.buf.slice(0..w.size)?, delimiter) {
                Some(p) if !delimiter.is_empty() => p,
                _ => return Ok(None),
            };
            let out = w.buf.slice(0..pos)?.to_vec();
            w.remove(0, pos + delimiter.len())?;
            Ok(Some(out))
        })
    }

    // ── Borrow ───────────────────────────────────────────────────────────

    /// Zero-copy access to `[0, size)` until the guard drops
    ///
    /// In thread-safe mode the lock is held for the guard's whole life.
    /// Only one borrow may be outstanding; other channel operations fail
    /// with `Borrowed` until it ends.
    pub fn borrow(&self) -> BufferResult<Borrowed<'_>> {
        let guard = self.enter()?;
        // Safety: entered; the guard keeps the lock for the borrow's life
        let w = unsafe { self.window() };
        w.check_usable()?;
        w.borrowed = true;
        self.publish(w);
        let size = w.size;
        Ok(Borrowed::new(self, size, guard))
    }

    /// Reconcile entry point
    ///
    /// Reconciliation happens when the guard ends, so with no borrow
    /// outstanding this is a no-op and returns `Ok(false)`. While a guard
    /// is alive it returns `Borrowed`.
    pub fn compact(&self) -> BufferResult<bool> {
        let _guard = self.enter()?;
        let w = unsafe { self.window() };
        if w.buf.is_released() {
            return Err(BufferError::Released);
        }
        if w.borrowed {
            return Err(BufferError::Borrowed);
        }
        Ok(false)
    }

    // ── Blocking helpers ─────────────────────────────────────────────────

    /// Wait until at least `len` bytes are present
    ///
    /// Polls with 1 ms sleeps; meaningful when another thread writes
    /// (thread-safe mode). Returns false on timeout or release.
    pub fn wait_data(&self, len: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let size = self.size();
            if size == RELEASED {
                return false;
            }
            if size >= len {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Append up to `length` head bytes to a file and drop them
    pub fn save_to_file(&self, path: impl AsRef<Path>, length: usize) -> BufferResult<usize> {
        use std::io::Write;

        let path = path.as_ref();
        self.with_window(|w| {
            let n = length.min(w.size);
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            file.write_all(w.buf.slice(0..n)?)?;
            w.remove(0, n)?;
            Ok(n)
        })
    }

    /// `io::Read` over the head
    pub fn reader(&self) -> ChannelReader<'_> {
        ChannelReader { channel: self }
    }

    /// `io::Write` onto the tail
    pub fn writer(&self) -> ChannelWriter<'_> {
        ChannelWriter { channel: self }
    }

    // ── Release ──────────────────────────────────────────────────────────

    /// Free the native memory. Idempotent.
    ///
    /// Fails with `Borrowed` while a guard is alive.
    pub fn release(&self) -> BufferResult<()> {
        let _guard = self.enter()?;
        let w = unsafe { self.window() };
        if w.borrowed {
            return Err(BufferError::Borrowed);
        }
        w.buf.release();
        w.size = 0;
        self.publish(w);
        Ok(())
    }
}

impl fmt::Debug for BufferChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferChannel")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("max_size", &self.max_size())
            .field("borrowed", &self.is_borrowed())
            .field("thread_safe", &self.thread_safe)
            .finish()
    }
}

// ============================================================================
// io adapters
// ============================================================================

/// Reads consume from the channel head
pub struct ChannelReader<'a> {
    channel: &'a BufferChannel,
}

impl io::Read for ChannelReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.channel.read_head(buf)?)
    }
}

/// Writes append to the channel tail
pub struct ChannelWriter<'a> {
    channel: &'a BufferChannel,
}

impl io::Write for ChannelWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.channel.write_tail(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(cap: usize, max: usize) -> BufferChannel {
        BufferChannel::with_stats(cap, max, Arc::new(MemoryStats::new())).unwrap()
    }

    #[test]
    fn test_growth_scenario() {
        let ch = channel(8, 1024);
        let data: Vec<u8> = (0..100u8).collect();
        assert_eq!(ch.write_tail(&data).unwrap(), 100);
        assert!(ch.capacity() >= 100);
        assert_eq!(ch.size(), 100);
        assert_eq!(ch.to_vec().unwrap(), data);
    }

    #[test]
    fn test_round_trip_hello() {
        let ch = channel(16, 1024);
        ch.write_tail(b"hello").unwrap();
        let mut out = [0u8; 5];
        assert_eq!(ch.read_head(&mut out).unwrap(), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(ch.size(), 0);
    }

    #[test]
    fn test_line_search() {
        let ch = channel(4, 1024);
        ch.write_tail(b"abc\ndef").unwrap();
        assert_eq!(ch.index_of(b"\n").unwrap(), Some(3));
        assert_eq!(ch.size(), 7);
        assert_eq!(ch.to_vec().unwrap(), b"abc\ndef");
    }

    #[test]
    fn test_capacity_violation() {
        let ch = channel(4, 10);
        let err = ch.write_tail(&[7u8; 11]).unwrap_err();
        assert_eq!(err, BufferError::TooLarge { requested: 11, max_size: 10 });
        assert_eq!(ch.size(), 0);
        assert_eq!(ch.capacity(), 4);
    }

    #[test]
    fn test_capacity_bound_after_partial_fill() {
        let ch = channel(4, 10);
        ch.write_tail(b"123456").unwrap();
        let cap = ch.capacity();
        assert!(ch.write_head(b"abcde").is_err());
        assert_eq!(ch.size(), 6);
        assert_eq!(ch.capacity(), cap);
        assert_eq!(ch.write_tail(b"7890").unwrap(), 4);
        assert!(ch.is_full());
        assert_eq!(ch.capacity(), 10);
    }

    #[test]
    fn test_head_and_tail_ends() {
        let ch = channel(2, 64);
        ch.write_tail(b"world").unwrap();
        ch.write_head(b"hello ").unwrap();
        assert_eq!(ch.to_vec().unwrap(), b"hello world");
        let mut tail = [0u8; 5];
        assert_eq!(ch.read_tail(&mut tail).unwrap(), 5);
        assert_eq!(&tail, b"world");
        let mut head = [0u8; 32];
        assert_eq!(ch.read_head(&mut head).unwrap(), 6);
        assert_eq!(&head[..6], b"hello ");
        assert!(ch.is_empty());
    }

    #[test]
    fn test_conservation_mixed_sequence() {
        let ch = channel(3, 4096);
        let mut model: std::collections::VecDeque<u8> = Default::default();
        let mut seed = 0x2545_f491u32;
        for step in 0..400 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let n = (seed % 37) as usize;
            let chunk: Vec<u8> = (0..n).map(|i| (step + i) as u8).collect();
            match seed % 4 {
                0 => {
                    if ch.write_tail(&chunk).is_ok() {
                        model.extend(&chunk);
                    }
                }
                1 => {
                    if ch.write_head(&chunk).is_ok() {
                        for &b in chunk.iter().rev() {
                            model.push_front(b);
                        }
                    }
                }
                2 => {
                    let mut dst = vec![0u8; n];
                    let got = ch.read_head(&mut dst).unwrap();
                    let expect: Vec<u8> = model.drain(..got).collect();
                    assert_eq!(&dst[..got], &expect[..]);
                }
                _ => {
                    let mut dst = vec![0u8; n];
                    let got = ch.read_tail(&mut dst).unwrap();
                    let expect: Vec<u8> = model.split_off(model.len() - got).into();
                    assert_eq!(&dst[..got], &expect[..]);
                }
            }
            assert_eq!(ch.size(), model.len());
            assert!(ch.size() <= ch.capacity());
            assert!(ch.capacity() <= ch.max_size());
        }
        let all: Vec<u8> = model.into_iter().collect();
        assert_eq!(ch.to_vec().unwrap(), all);
    }

    #[test]
    fn test_shrink_head_keeps_order() {
        let ch = channel(8, 64);
        ch.write_tail(b"0123456789").unwrap();
        for k in 1..=3 {
            let before = ch.to_vec().unwrap();
            assert_eq!(ch.shrink(0, k).unwrap(), k as usize);
            assert_eq!(ch.to_vec().unwrap(), &before[k as usize..]);
        }
        assert_eq!(ch.to_vec().unwrap(), b"6789");
        assert_eq!(ch.shrink(0, 4).unwrap(), 4);
        assert!(ch.is_empty());
    }

    #[test]
    fn test_shrink_directions() {
        let ch = channel(8, 64);
        ch.write_tail(b"abcdefgh").unwrap();
        ch.shrink(2, 2).unwrap();
        assert_eq!(ch.to_vec().unwrap(), b"abefgh");
        ch.shrink(4, -2).unwrap();
        assert_eq!(ch.to_vec().unwrap(), b"abgh");
        ch.shrink_tail(1).unwrap();
        assert_eq!(ch.to_vec().unwrap(), b"abg");
        ch.shrink_head(1).unwrap();
        assert_eq!(ch.to_vec().unwrap(), b"bg");
        assert!(matches!(ch.shrink(3, 1), Err(BufferError::OutOfBounds { .. })));
        assert_eq!(ch.to_vec().unwrap(), b"bg");
    }

    #[test]
    fn test_shrink_clips_to_content() {
        let ch = channel(8, 64);
        ch.write_tail(b"abcdef").unwrap();
        assert_eq!(ch.shrink(4, 10).unwrap(), 2);
        assert_eq!(ch.to_vec().unwrap(), b"abcd");
        assert_eq!(ch.shrink(1, -5).unwrap(), 1);
        assert_eq!(ch.to_vec().unwrap(), b"bcd");
        assert_eq!(ch.shrink_tail(9).unwrap(), 3);
        assert!(ch.is_empty());
        // nothing to remove is not an error, wherever it is aimed
        assert_eq!(ch.shrink(0, 3).unwrap(), 0);
        assert_eq!(ch.shrink(5, -3).unwrap(), 0);
        assert_eq!(ch.shrink_head(1).unwrap(), 0);
        assert_eq!(ch.shrink_tail(1).unwrap(), 0);
    }

    #[test]
    fn test_index_of_not_found_and_long_pattern() {
        let ch = channel(8, 64);
        ch.write_tail(b"abc").unwrap();
        assert_eq!(ch.index_of(b"abcd").unwrap(), None);
        assert_eq!(ch.index_of(b"x").unwrap(), None);
        assert_eq!(ch.index_of(b"bc").unwrap(), Some(1));
        assert_eq!(ch.to_vec().unwrap(), b"abc");
    }

    #[test]
    fn test_borrow_reconcile_idempotence() {
        let ch = channel(8, 64);
        // no borrow: compact does nothing
        assert_eq!(ch.compact().unwrap(), false);
        assert_eq!(ch.size(), 0);

        ch.write_tail(b"headerpayload").unwrap();
        {
            let mut view = ch.borrow().unwrap();
            assert_eq!(view.data(), b"headerpayload");
            view.advance(6).unwrap();
            assert_eq!(ch.compact(), Err(BufferError::Borrowed));
        }
        assert_eq!(ch.size(), 7);
        assert_eq!(ch.compact().unwrap(), false);
        assert_eq!(ch.size(), 7);
        assert_eq!(ch.to_vec().unwrap(), b"payload");
    }

    #[test]
    fn test_borrow_blocks_other_ops() {
        let ch = channel(8, 64);
        ch.write_tail(b"abc").unwrap();
        let view = ch.borrow().unwrap();
        assert_eq!(ch.write_tail(b"x"), Err(BufferError::Borrowed));
        assert!(matches!(ch.borrow(), Err(BufferError::Borrowed)));
        assert_eq!(ch.release(), Err(BufferError::Borrowed));
        assert!(ch.is_borrowed());
        drop(view);
        assert!(!ch.is_borrowed());
        assert_eq!(ch.write_tail(b"x").unwrap(), 1);
    }

    #[test]
    fn test_release_semantics() {
        let ch = channel(8, 64);
        ch.write_tail(b"abc").unwrap();
        ch.release().unwrap();
        ch.release().unwrap();
        assert_eq!(ch.size(), RELEASED);
        assert!(ch.is_released());
        assert_eq!(ch.write_tail(b"x"), Err(BufferError::Released));
        assert_eq!(ch.read_head(&mut [0u8; 1]), Err(BufferError::Released));
        assert_eq!(ch.index_of(b"a"), Err(BufferError::Released));
        assert!(matches!(ch.borrow(), Err(BufferError::Released)));
        assert_eq!(ch.compact(), Err(BufferError::Released));
        assert!(!ch.wait_data(1, Duration::from_millis(5)));
    }

    #[test]
    fn test_line_and_split_reads() {
        let ch = channel(8, 64);
        ch.write_tail(b"one\ntwo\r\nrest").unwrap();
        assert_eq!(ch.read_line().unwrap().as_deref(), Some("one\n"));
        assert_eq!(ch.read_with_split(b"\r\n").unwrap(), Some(b"two".to_vec()));
        assert_eq!(ch.read_line().unwrap(), None);
        assert!(ch.starts_with(b"re").unwrap());
        assert_eq!(ch.get(3).unwrap(), b't');
        assert!(ch.get(4).is_err());
    }

    #[test]
    fn test_write_at_and_read_at() {
        let ch = channel(4, 64);
        ch.write_tail(b"helloworld").unwrap();
        ch.write_at(5, b", ").unwrap();
        assert_eq!(ch.to_vec().unwrap(), b"hello, world");
        let mut mid = [0u8; 2];
        assert_eq!(ch.read_at(5, &mut mid).unwrap(), 2);
        assert_eq!(ch.to_vec().unwrap(), b"helloworld");
        assert!(ch.write_at(11, b"x").is_err());
    }

    #[test]
    fn test_set_max_size() {
        let ch = channel(16, 32);
        assert!(ch.set_max_size(8).is_err());
        ch.set_max_size(64).unwrap();
        assert_eq!(ch.available(), 64);
    }

    #[test]
    fn test_io_adapters() {
        use std::io::{Read, Write};

        let ch = channel(4, 64);
        write!(ch.writer(), "{}-{}", 12, "ab").unwrap();
        let mut s = String::new();
        ch.reader().read_to_string(&mut s).unwrap();
        assert_eq!(s, "12-ab");
    }

    #[test]
    fn test_save_to_file() {
        let ch = channel(8, 64);
        ch.write_tail(b"persist-me").unwrap();
        let path = std::env::temp_dir().join(format!("nbio-save-{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);
        assert_eq!(ch.save_to_file(&path, 7).unwrap(), 7);
        assert_eq!(ch.to_vec().unwrap(), b"-me");
        assert_eq!(std::fs::read(&path).unwrap(), b"persist");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_thread_safe_producer_consumer() {
        let mut ch = channel(8, 1 << 20);
        ch.set_thread_safe(true);
        let ch = Arc::new(ch);
        let producer = {
            let ch = Arc::clone(&ch);
            std::thread::spawn(move || {
                for i in 0..1000u32 {
                    ch.write_tail(&i.to_be_bytes()).unwrap();
                }
            })
        };
        let mut got = Vec::new();
        while got.len() < 4000 {
            if ch.wait_data(4, Duration::from_secs(5)) {
                let mut view = ch.borrow().unwrap();
                let whole = view.len() / 4 * 4;
                got.extend_from_slice(&view.data()[..whole]);
                view.advance(whole).unwrap();
            }
        }
        producer.join().unwrap();
        for (i, chunk) in got.chunks(4).enumerate() {
            assert_eq!(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]), i as u32);
        }
    }

    #[test]
    fn test_unsynchronized_channel_rejects_other_threads() {
        let ch = Arc::new(channel(8, 64));
        ch.write_tail(b"mine").unwrap();
        let other = Arc::clone(&ch);
        let (write, borrowed, size) = std::thread::spawn(move || {
            let borrowed = matches!(other.borrow(), Err(BufferError::WrongThread));
            (other.write_tail(b"x"), borrowed, other.size())
        })
        .join()
        .unwrap();
        assert_eq!(write, Err(BufferError::WrongThread));
        assert!(borrowed);
        // queries stay answerable everywhere
        assert_eq!(size, 4);
        assert_eq!(ch.to_vec().unwrap(), b"mine");
    }

    #[test]
    fn test_first_user_owns_until_mode_change() {
        let ch = Arc::new(channel(8, 64));
        let other = Arc::clone(&ch);
        std::thread::spawn(move || other.write_tail(b"abc").unwrap())
            .join()
            .unwrap();
        assert_eq!(ch.size(), 3);
        assert_eq!(ch.read_head(&mut [0u8; 3]), Err(BufferError::WrongThread));
        assert_eq!(ch.release(), Err(BufferError::WrongThread));

        let mut ch = Arc::try_unwrap(ch).unwrap();
        ch.set_thread_safe(false);
        let mut out = [0u8; 3];
        assert_eq!(ch.read_head(&mut out).unwrap(), 3);
        assert_eq!(&out, b"abc");
    }

    #[test]
    fn test_stats_track_channel_lifetime() {
        let stats = Arc::new(MemoryStats::new());
        let ch = BufferChannel::with_stats(8, 1024, Arc::clone(&stats)).unwrap();
        ch.write_tail(&[1u8; 100]).unwrap();
        assert_eq!(stats.bytes_outstanding(), ch.capacity());
        drop(ch);
        assert_eq!(stats.bytes_outstanding(), 0);
        assert_eq!(stats.live_buffers(), 0);
    }
}
