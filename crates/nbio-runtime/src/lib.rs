//! # nbio-runtime
//!
//! Threads for the network engine.
//!
//! ```text
//!                 RunnerGroup (round-robin choose())
//!        ┌──────────────┬──────────────┬──────────────┐
//!        ▼              ▼              ▼              ▼
//!   EventRunner 0  EventRunner 1     ...       EventRunner N-1
//!   ┌──────────┐
//!   │ SegQueue │◄── add_event(priority, task) from any thread
//!   │  inbox   │        │ unpark + Notifier::notify
//!   └────┬─────┘        ▼
//!        ▼       runner thread: drain inbox → heap (priority, seq)
//!   ┌──────────┐        → run task (panics caught) → repeat
//!   │   heap   │
//!   └──────────┘        attachment: per-runner selector (nbio-net)
//!
//!   TimerThread: one thread ticking TimerTasks (idle checks, memory report)
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Lock-free submission**: any thread pushes into the runner's
//!    `crossbeam_queue::SegQueue`; only the runner thread touches the
//!    heap, so ordering needs no lock.
//! 2. **Higher value runs first**: priorities are 1..=10, ties in FIFO
//!    order via a per-runner sequence number. The selector polls at 4,
//!    below events (5) and registrations (6).
//! 3. **Cooperative loops**: long-running work (the selector) re-enqueues
//!    itself instead of owning the thread, so other tasks interleave.
//! 4. **Explicit context**: groups, config and timers are values the
//!    caller constructs; nothing here is a process-wide static.

pub mod config;
pub mod runner;
pub mod group;
pub mod notifier;
pub mod timer;

pub use config::RuntimeConfig;
pub use group::RunnerGroup;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use notifier::EventFdNotifier;
pub use notifier::Notifier;
pub use runner::{priority, EventRunner};
pub use timer::{TimerTask, TimerThread};
