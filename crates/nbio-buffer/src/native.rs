//! Native Buffer Primitive
//!
//! One owning handle per `libc` allocation. The block is zero-filled on
//! allocation and on growth, so every byte up to `capacity` is
//! initialized and may be exposed as a slice.
//!
//! Liveness is encoded in the pointer: null means released. Only
//! `allocate` produces a live handle; `release` (or `Drop`) frees the
//! block exactly once.

use nbio_core::error::{BufferError, BufferResult};

use std::fmt;
use std::ops::Range;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

// ============================================================================
// Memory statistics
// ============================================================================

/// Leak-accounting counters
///
/// Advisory only: nothing in the engine branches on these values.
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// Bytes currently allocated
    bytes: AtomicUsize,
    /// Buffers currently alive
    live: AtomicUsize,
    /// Allocations ever made (allocate + reallocate)
    allocations: AtomicU64,
    /// Frees ever made
    frees: AtomicU64,
}

static GLOBAL_STATS: OnceLock<Arc<MemoryStats>> = OnceLock::new();

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide default context
    pub fn global() -> Arc<MemoryStats> {
        Arc::clone(GLOBAL_STATS.get_or_init(|| Arc::new(MemoryStats::new())))
    }

    fn on_allocate(&self, size: usize) {
        self.bytes.fetch_add(size, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    fn on_reallocate(&self, old: usize, new: usize) {
        if new >= old {
            self.bytes.fetch_add(new - old, Ordering::Relaxed);
        } else {
            self.bytes.fetch_sub(old - new, Ordering::Relaxed);
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    fn on_free(&self, size: usize) {
        self.bytes.fetch_sub(size, Ordering::Relaxed);
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_outstanding(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn free_count(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            bytes_outstanding: self.bytes_outstanding(),
            live_buffers: self.live_buffers(),
            allocations: self.allocation_count(),
            frees: self.free_count(),
        }
    }
}

/// Point-in-time copy of `MemoryStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub bytes_outstanding: usize,
    pub live_buffers: usize,
    pub allocations: u64,
    pub frees: u64,
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "native memory: {} bytes in {} buffers (allocs={} frees={})",
            self.bytes_outstanding, self.live_buffers, self.allocations, self.frees
        )
    }
}

// ============================================================================
// NativeBuffer
// ============================================================================

/// An owned, zero-initialized native memory block
pub struct NativeBuffer {
    ptr: *mut u8,
    capacity: u32,
    stats: Arc<MemoryStats>,
}

// Safety: NativeBuffer uniquely owns its block; shared references only
// allow reads.
unsafe impl Send for NativeBuffer {}
unsafe impl Sync for NativeBuffer {}

impl NativeBuffer {
    /// Allocate `capacity` zeroed bytes
    ///
    /// A zero capacity still allocates one byte so a live buffer always
    /// has a non-null address.
    pub fn allocate(capacity: usize, stats: Arc<MemoryStats>) -> BufferResult<Self> {
        let cap = checked_capacity(capacity)?;
        let ptr = unsafe { libc::calloc(1, cap.max(1) as usize) } as *mut u8;
        if ptr.is_null() {
            return Err(BufferError::AllocationFailed(capacity));
        }
        stats.on_allocate(cap as usize);
        Ok(Self { ptr, capacity: cap, stats })
    }

    /// Resize the block, possibly moving it
    ///
    /// Contents up to `min(old, new)` are preserved and any grown tail is
    /// zeroed. On failure the old block stays valid and unchanged.
    pub fn reallocate(&mut self, new_capacity: usize) -> BufferResult<()> {
        self.check_live()?;
        let new_cap = checked_capacity(new_capacity)?;
        if new_cap == self.capacity {
            return Ok(());
        }
        let ptr = unsafe { libc::realloc(self.ptr as *mut libc::c_void, new_cap.max(1) as usize) }
            as *mut u8;
        if ptr.is_null() {
            return Err(BufferError::AllocationFailed(new_capacity));
        }
        let old_cap = self.capacity;
        if new_cap > old_cap {
            unsafe {
                ptr::write_bytes(ptr.add(old_cap as usize), 0, (new_cap - old_cap) as usize);
            }
        }
        self.stats.on_reallocate(old_cap as usize, new_cap as usize);
        self.ptr = ptr;
        self.capacity = new_cap;
        Ok(())
    }

    /// Move `len` bytes from `from` to `to`; ranges may overlap
    pub fn move_bytes(&mut self, from: usize, to: usize, len: usize) -> BufferResult<()> {
        self.check_live()?;
        if len == 0 || from == to {
            return Ok(());
        }
        self.check_range(from, len)?;
        self.check_range(to, len)?;
        unsafe {
            ptr::copy(self.ptr.add(from), self.ptr.add(to), len);
        }
        Ok(())
    }

    /// Copy `src` into the block at `offset`
    pub fn copy_in(&mut self, offset: usize, src: &[u8]) -> BufferResult<()> {
        self.slice_mut(offset..offset + src.len())?.copy_from_slice(src);
        Ok(())
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the block
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> BufferResult<()> {
        dst.copy_from_slice(self.slice(offset..offset + dst.len())?);
        Ok(())
    }

    pub fn slice(&self, range: Range<usize>) -> BufferResult<&[u8]> {
        self.check_live()?;
        let len = range.end.saturating_sub(range.start);
        self.check_range(range.start, len)?;
        // Safety: live block, range within capacity, memory initialized
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.add(range.start), len) })
    }

    pub fn slice_mut(&mut self, range: Range<usize>) -> BufferResult<&mut [u8]> {
        self.check_live()?;
        let len = range.end.saturating_sub(range.start);
        self.check_range(range.start, len)?;
        // Safety: as above, plus &mut self guarantees exclusivity
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.add(range.start), len) })
    }

    /// Free the block. Safe to call more than once.
    pub fn release(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        unsafe { libc::free(self.ptr as *mut libc::c_void) };
        self.stats.on_free(self.capacity as usize);
        self.ptr = ptr::null_mut();
        self.capacity = 0;
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.ptr.is_null()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn stats(&self) -> &Arc<MemoryStats> {
        &self.stats
    }

    #[inline]
    fn check_live(&self) -> BufferResult<()> {
        if self.ptr.is_null() {
            Err(BufferError::Released)
        } else {
            Ok(())
        }
    }

    #[inline]
    fn check_range(&self, offset: usize, len: usize) -> BufferResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.capacity as usize => Ok(()),
            _ => Err(BufferError::OutOfBounds {
                offset,
                len,
                size: self.capacity as usize,
            }),
        }
    }
}

fn checked_capacity(capacity: usize) -> BufferResult<u32> {
    u32::try_from(capacity).map_err(|_| BufferError::TooLarge {
        requested: capacity,
        max_size: u32::MAX as usize,
    })
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("capacity", &self.capacity)
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> Arc<MemoryStats> {
        Arc::new(MemoryStats::new())
    }

    #[test]
    fn test_allocate_is_zeroed_and_counted() {
        let stats = stats();
        let buf = NativeBuffer::allocate(64, Arc::clone(&stats)).unwrap();
        assert_eq!(buf.capacity(), 64);
        assert!(buf.slice(0..64).unwrap().iter().all(|&b| b == 0));
        assert_eq!(stats.bytes_outstanding(), 64);
        assert_eq!(stats.live_buffers(), 1);
        drop(buf);
        assert_eq!(stats.bytes_outstanding(), 0);
        assert_eq!(stats.live_buffers(), 0);
        assert_eq!(stats.free_count(), 1);
    }

    #[test]
    fn test_reallocate_preserves_prefix() {
        let stats = stats();
        let mut buf = NativeBuffer::allocate(4, Arc::clone(&stats)).unwrap();
        buf.copy_in(0, b"abcd").unwrap();
        buf.reallocate(4096).unwrap();
        assert_eq!(buf.slice(0..4).unwrap(), b"abcd");
        assert!(buf.slice(4..4096).unwrap().iter().all(|&b| b == 0));
        assert_eq!(stats.bytes_outstanding(), 4096);
        buf.reallocate(2).unwrap();
        assert_eq!(buf.slice(0..2).unwrap(), b"ab");
        assert_eq!(stats.bytes_outstanding(), 2);
    }

    #[test]
    fn test_move_overlapping_forward_and_back() {
        let mut buf = NativeBuffer::allocate(10, stats()).unwrap();
        buf.copy_in(0, b"0123456789").unwrap();
        buf.move_bytes(0, 2, 6).unwrap();
        assert_eq!(buf.slice(0..10).unwrap(), b"0101234589");
        buf.move_bytes(2, 0, 6).unwrap();
        assert_eq!(buf.slice(0..6).unwrap(), b"012345");
    }

    #[test]
    fn test_move_out_of_bounds() {
        let mut buf = NativeBuffer::allocate(8, stats()).unwrap();
        let err = buf.move_bytes(4, 0, 5).unwrap_err();
        assert!(matches!(err, BufferError::OutOfBounds { .. }));
        assert!(buf.slice(6..9).is_err());
    }

    #[test]
    fn test_release_is_idempotent_and_final() {
        let stats = stats();
        let mut buf = NativeBuffer::allocate(16, Arc::clone(&stats)).unwrap();
        buf.release();
        buf.release();
        assert!(buf.is_released());
        assert_eq!(buf.capacity(), 0);
        assert_eq!(stats.free_count(), 1);
        assert_eq!(buf.reallocate(32), Err(BufferError::Released));
        assert_eq!(buf.move_bytes(0, 1, 1), Err(BufferError::Released));
        assert!(matches!(buf.slice(0..0), Err(BufferError::Released)));
    }

    #[test]
    fn test_zero_capacity() {
        let mut buf = NativeBuffer::allocate(0, stats()).unwrap();
        assert!(!buf.is_released());
        assert_eq!(buf.capacity(), 0);
        buf.reallocate(3).unwrap();
        buf.copy_in(0, b"xyz").unwrap();
        let mut out = [0u8; 3];
        buf.copy_out(0, &mut out).unwrap();
        assert_eq!(&out, b"xyz");
    }

    #[test]
    fn test_snapshot_display() {
        let stats = stats();
        let _a = NativeBuffer::allocate(10, Arc::clone(&stats)).unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.live_buffers, 1);
        assert!(snap.to_string().contains("10 bytes in 1 buffers"));
    }
}
