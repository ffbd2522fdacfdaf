//! # nbio-buffer
//!
//! Off-heap byte storage for the network engine.
//!
//! ```text
//!   ┌──────────────────────── BufferChannel ───────────────────────┐
//!   │  write_head ──►┌──────────── size ───────────┐◄── write_tail │
//!   │  read_head  ◄──│ valid bytes [0, size)       │──► read_tail  │
//!   │                └─────────────────────────────┘ spare ...cap  │
//!   │          borrow() ──► Borrowed { position, limit }           │
//!   │                       drop ──► reconcile + unlock            │
//!   └────────────────────────────┬─────────────────────────────────┘
//!                                │ owns exactly one
//!                        ┌───────▼────────┐       ┌─────────────┐
//!                        │  NativeBuffer  │──────►│ MemoryStats │
//!                        │ calloc/realloc │ count │ (advisory)  │
//!                        └────────────────┘       └─────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! 1. **No bare addresses**: `NativeBuffer` is the only type that sees the
//!    raw pointer. Everything else goes through bounds-checked slices.
//! 2. **memmove everywhere**: every slide (head reads, head writes, shrink,
//!    reconcile) is an overlapping move inside one allocation.
//! 3. **Scoped borrow**: zero-copy access is a guard whose `Drop` performs
//!    the reconcile and unlock, so no exit path can leak the lock.
//! 4. **Explicit counters**: leak accounting lives in a `MemoryStats`
//!    context passed at construction; `MemoryStats::global()` is only the
//!    default.

pub mod native;
pub mod channel;
pub mod borrow;
pub mod search;

pub use borrow::Borrowed;
pub use channel::{BufferChannel, ChannelReader, ChannelWriter, RELEASED};
pub use native::{MemorySnapshot, MemoryStats, NativeBuffer};
pub use search::index_of;
