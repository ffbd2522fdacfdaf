//! Lock primitives
//!
//! - `SpinLock<T>`: short critical sections (selector slab, TLS parser
//!   slot, runner bookkeeping). Spins with pause hints, then yields.
//! - `ReentrantLock`: the Buffer Channel's optional mutual-exclusion mode.
//!   The owning thread may re-acquire it, so a borrow guard can stay open
//!   while the same thread calls other channel operations.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Spins before falling back to `yield_now`
const SPIN_LIMIT: u32 = 128;

#[inline]
fn backoff(spins: &mut u32) {
    if *spins < SPIN_LIMIT {
        *spins += 1;
        for _ in 0..(*spins).min(32) {
            core::hint::spin_loop();
        }
    } else {
        std::thread::yield_now();
    }
}

// ============================================================================
// SpinLock
// ============================================================================

/// A test-and-test-and-set spin lock owning its data
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: SpinLock hands out access to T only while holding the lock
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut spins = 0u32;
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard { lock: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                backoff(&mut spins);
            }
        }
    }

    /// Acquire without waiting
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Run `f` with the lock held
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

/// Releases the spin lock when dropped
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: guard exists only while the lock is held
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: guard exists only while the lock is held
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

// ============================================================================
// ReentrantLock
// ============================================================================

thread_local! {
    static THREAD_TOKEN: u8 = const { 0 };
}

/// Non-zero identifier unique among live threads
#[inline]
fn current_token() -> usize {
    THREAD_TOKEN.with(|t| t as *const u8 as usize)
}

/// A data-less lock the owning thread may acquire recursively
///
/// The protected state lives beside the lock (the Buffer Channel keeps
/// its window in an `UnsafeCell`); guards only prove ownership.
pub struct ReentrantLock {
    owner: AtomicUsize,
    depth: UnsafeCell<usize>,
}

// Safety: `depth` is only touched by the thread recorded in `owner`
unsafe impl Send for ReentrantLock {}
unsafe impl Sync for ReentrantLock {}

impl ReentrantLock {
    pub const fn new() -> Self {
        ReentrantLock {
            owner: AtomicUsize::new(0),
            depth: UnsafeCell::new(0),
        }
    }

    /// Acquire, re-entering if this thread already holds the lock
    pub fn lock(&self) -> ReentrantGuard<'_> {
        let me = current_token();
        if self.owner.load(Ordering::Relaxed) == me {
            // Safety: we are the owner
            unsafe { *self.depth.get() += 1 };
            return ReentrantGuard { lock: self };
        }
        let mut spins = 0u32;
        while self
            .owner
            .compare_exchange_weak(0, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff(&mut spins);
        }
        // Safety: ownership just acquired
        unsafe { *self.depth.get() = 1 };
        ReentrantGuard { lock: self }
    }

    /// True when any thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != 0
    }

    /// True when the calling thread holds the lock
    pub fn is_held_by_current(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_token()
    }

    fn unlock(&self) {
        // Safety: only the owner holds guards
        let depth = unsafe { &mut *self.depth.get() };
        *depth -= 1;
        if *depth == 0 {
            self.owner.store(0, Ordering::Release);
        }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        ReentrantLock::new()
    }
}

/// Proof of holding a `ReentrantLock`; releases one level on drop
pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_spinlock_basic() {
        let lock = SpinLock::new(0u32);
        *lock.lock() = 42;
        assert_eq!(*lock.lock(), 42);
        assert_eq!(lock.with(|v| *v + 1), 43);
    }

    #[test]
    fn test_spinlock_try_lock() {
        let lock = SpinLock::new(());
        let g = lock.try_lock();
        assert!(g.is_some());
        assert!(lock.try_lock().is_none());
        drop(g);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_spinlock_contention() {
        let lock = Arc::new(SpinLock::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }

    #[test]
    fn test_reentrant_same_thread() {
        let lock = ReentrantLock::new();
        let outer = lock.lock();
        assert!(lock.is_held_by_current());
        {
            let _inner = lock.lock();
            assert!(lock.is_locked());
        }
        assert!(lock.is_locked());
        drop(outer);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_reentrant_excludes_other_threads() {
        let lock = Arc::new(ReentrantLock::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _g = lock.lock();
                        let _g2 = lock.lock();
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 2000);
        assert!(!lock.is_locked());
    }
}
