//! Timer-thread tasks
//!
//! - `IdleChecker` walks a context's sessions every tick and lets each one
//!   check its handshake, idle and read deadlines.
//! - `MemoryReporter` logs the native memory counters periodically.
//!
//! Both run on the `TimerThread`, never on a runner.

use crate::context::SocketContext;

use nbio_buffer::MemoryStats;
use nbio_core::ninfo;
use nbio_core::sync::SpinLock;
use nbio_runtime::TimerTask;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-tick session deadline checks
pub struct IdleChecker {
    context: Arc<SocketContext>,
}

impl IdleChecker {
    pub fn new(context: Arc<SocketContext>) -> Self {
        Self { context }
    }
}

impl TimerTask for IdleChecker {
    fn tick(&self, now: Instant) -> bool {
        for session in self.context.sessions.snapshot() {
            session.check_timeouts(now);
        }
        true
    }

    fn name(&self) -> &str {
        "idle-checker"
    }
}

/// Logs `MemoryStats` every `interval`
pub struct MemoryReporter {
    stats: Arc<MemoryStats>,
    interval: Duration,
    last: SpinLock<Instant>,
}

impl MemoryReporter {
    pub fn new(stats: Arc<MemoryStats>, interval: Duration) -> Self {
        Self {
            stats,
            interval,
            last: SpinLock::new(Instant::now()),
        }
    }

    /// Report the process-wide counters
    pub fn global(interval: Duration) -> Self {
        Self::new(MemoryStats::global(), interval)
    }
}

impl TimerTask for MemoryReporter {
    fn tick(&self, now: Instant) -> bool {
        let mut last = self.last.lock();
        if now.saturating_duration_since(*last) >= self.interval {
            *last = now;
            ninfo!("{}", self.stats.snapshot());
        }
        true
    }

    fn name(&self) -> &str {
        "memory-reporter"
    }
}
