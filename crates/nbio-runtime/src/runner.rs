//! Event runner
//!
//! A runner is one OS thread draining a priority-ordered task queue.
//! Sessions assigned to a runner stay on it for their whole life, which
//! is what lets the session hot path run without locks.

use crate::notifier::Notifier;

use nbio_core::constants::{PRIORITY_MAX, PRIORITY_MIN};
use nbio_core::error::RunnerError;
use nbio_core::sync::SpinLock;
use nbio_core::{ndebug, nerror};

use crossbeam_queue::SegQueue;

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread, ThreadId};
use std::time::Duration;

/// Task priorities; higher values run first
///
/// The selector re-arms itself at the lowest of the three, so queued
/// registrations and session events always get a turn between polls.
pub mod priority {
    /// Selector poll loop
    pub const SELECT: u8 = 4;
    /// Session event dispatch (and the default)
    pub const EVENT: u8 = 5;
    /// Registering a new connection with a selector
    pub const REGISTER: u8 = 6;
    pub const DEFAULT: u8 = EVENT;
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct EventTask {
    priority: u8,
    seq: u64,
    task: Task,
}

impl PartialEq for EventTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for EventTask {}

impl PartialOrd for EventTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTask {
    // BinaryHeap is a max-heap: highest priority pops first, and within
    // one priority the lowest sequence (FIFO)
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-threaded priority task executor
pub struct EventRunner {
    index: usize,
    name: String,
    inbox: SegQueue<EventTask>,
    /// Tasks submitted but not yet started
    pending: AtomicUsize,
    seq: AtomicU64,
    running: AtomicBool,
    thread: OnceLock<Thread>,
    thread_id: OnceLock<ThreadId>,
    handle: SpinLock<Option<JoinHandle<()>>>,
    waker: OnceLock<Arc<dyn Notifier>>,
    attachment: OnceLock<Arc<dyn Any + Send + Sync>>,
    sessions: AtomicUsize,
    completed: AtomicU64,
    park_timeout: Duration,
}

impl EventRunner {
    /// Spawn a runner thread named `name`
    pub fn start(index: usize, name: String, park_timeout: Duration) -> Result<Arc<Self>, RunnerError> {
        let runner = Arc::new(Self {
            index,
            name: name.clone(),
            inbox: SegQueue::new(),
            pending: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
            running: AtomicBool::new(true),
            thread: OnceLock::new(),
            thread_id: OnceLock::new(),
            handle: SpinLock::new(None),
            waker: OnceLock::new(),
            attachment: OnceLock::new(),
            sessions: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            park_timeout,
        });

        let worker = Arc::clone(&runner);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;

        let _ = runner.thread_id.set(handle.thread().id());
        let _ = runner.thread.set(handle.thread().clone());
        *runner.handle.lock() = Some(handle);
        ndebug!("runner {} started", runner.name);
        Ok(runner)
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Queue `task` at `priority` (1..=10, higher runs first)
    pub fn add_event<F>(&self, priority: u8, task: F) -> Result<(), RunnerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(RunnerError::InvalidPriority(priority));
        }
        if !self.is_running() {
            return Err(RunnerError::ShutDown);
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.inbox.push(EventTask {
            priority,
            seq,
            task: Box::new(task),
        });
        self.wake();
        Ok(())
    }

    /// Queue `task` at the default priority
    pub fn add_event_default<F>(&self, task: F) -> Result<(), RunnerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_event(priority::DEFAULT, task)
    }

    /// Wake the runner thread from a park or a selector wait
    pub fn wake(&self) {
        if self.in_runner_thread() {
            return;
        }
        if let Some(t) = self.thread.get() {
            t.unpark();
        }
        if let Some(waker) = self.waker.get() {
            if let Err(e) = waker.notify() {
                nerror!("runner {} waker failed: {}", self.name, e);
            }
        }
    }

    // ── Thread loop ──────────────────────────────────────────────────────

    fn run(self: Arc<Self>) {
        let _ = self.thread_id.set(thread::current().id());
        let mut heap: BinaryHeap<EventTask> = BinaryHeap::new();
        loop {
            while let Some(task) = self.inbox.pop() {
                heap.push(task);
            }
            if let Some(task) = heap.pop() {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                self.execute(task);
                continue;
            }
            if !self.is_running() {
                if self.inbox.is_empty() {
                    break;
                }
                continue;
            }
            thread::park_timeout(self.park_timeout);
        }
        ndebug!(
            "runner {} stopped after {} tasks",
            self.name,
            self.completed.load(Ordering::Relaxed)
        );
    }

    fn execute(&self, task: EventTask) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(task.task));
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Err(payload) = outcome {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            nerror!(
                "runner {} task (priority {}) panicked: {}",
                self.name,
                task.priority,
                msg
            );
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// Stop accepting tasks, drain what is queued and join the thread
    ///
    /// Called from the runner's own thread this only signals; the loop
    /// exits once the queue is empty.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            ndebug!("runner {} shutting down", self.name);
        }
        if let Some(t) = self.thread.get() {
            t.unpark();
        }
        if let Some(waker) = self.waker.get() {
            let _ = waker.notify();
        }
        if self.in_runner_thread() {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True when called from this runner's thread
    #[inline]
    pub fn in_runner_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    /// Tasks submitted and not yet started
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the notifier poked on cross-thread submission (once)
    pub fn set_waker(&self, waker: Arc<dyn Notifier>) -> bool {
        self.waker.set(waker).is_ok()
    }

    /// Attach per-runner state, e.g. the selector (once)
    pub fn set_attachment(&self, value: Arc<dyn Any + Send + Sync>) -> bool {
        self.attachment.set(value).is_ok()
    }

    /// Attachment downcast to `T`
    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.attachment
            .get()
            .and_then(|a| Arc::clone(a).downcast::<T>().ok())
    }

    // ── Session accounting ──────────────────────────────────────────────

    pub fn session_bound(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_unbound(&self) {
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Sessions currently pinned to this runner
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }
}

impl Drop for EventRunner {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for EventRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRunner")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("sessions", &self.session_count())
            .field("running", &self.is_running())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
