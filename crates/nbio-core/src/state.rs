//! Session state flags
//!
//! The owning runner thread and the idle checker thread touch the same
//! session, so every flag is an atomic. Lifecycle:
//!
//! ```text
//!   init ──► connected ──► (receiving | sending | flushing)* ──► closed
//!     └───────────────────────────────────────────────────────────┘
//! ```
//!
//! `closed` is terminal: once set, no other transition takes effect.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

/// Atomic lifecycle and activity flags for one session
#[derive(Default)]
pub struct SessionFlags {
    init: AtomicBool,
    connected: AtomicBool,
    receiving: AtomicBool,
    sending: AtomicBool,
    flushing: AtomicBool,
    closed: AtomicBool,
}

impl SessionFlags {
    /// Fresh session: `init` set, everything else clear
    pub fn new() -> Self {
        let flags = Self::default();
        flags.init.store(true, Ordering::Relaxed);
        flags
    }

    /// `init → connected`. Returns false when already connected or closed.
    pub fn mark_connected(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.connected.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.init.store(false, Ordering::Release);
        true
    }

    /// Set `closed`. Returns true only for the first caller.
    pub fn mark_closed(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.connected.store(false, Ordering::Release);
            self.init.store(false, Ordering::Release);
        }
        first
    }

    /// Claim the receive slot. False if closed or a receive is already queued.
    pub fn begin_receive(&self) -> bool {
        self.claim(&self.receiving)
    }

    pub fn end_receive(&self) {
        self.receiving.store(false, Ordering::Release);
    }

    pub fn begin_send(&self) -> bool {
        self.claim(&self.sending)
    }

    pub fn end_send(&self) {
        self.sending.store(false, Ordering::Release);
    }

    pub fn begin_flush(&self) -> bool {
        self.claim(&self.flushing)
    }

    /// Sequentially consistent with `begin_flush`, so a flusher that
    /// checks the write channel after this sees every append made by a
    /// sender whose claim failed
    pub fn end_flush(&self) {
        self.flushing.store(false, Ordering::SeqCst);
    }

    #[inline]
    fn claim(&self, flag: &AtomicBool) -> bool {
        !self.is_closed()
            && flag
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        self.init.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SessionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFlags")
            .field("init", &self.is_init())
            .field("connected", &self.is_connected())
            .field("receiving", &self.is_receiving())
            .field("sending", &self.is_sending())
            .field("flushing", &self.is_flushing())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
