//! Timer thread
//!
//! One background thread ticks a set of `TimerTask`s at a fixed check
//! interval. Tasks run on the timer thread, so anything they touch on a
//! session must be safe for concurrent access (atomic flags, timestamps,
//! `close()`), or be handed to the owning runner as an event.

use nbio_core::error::RunnerError;
use nbio_core::sync::SpinLock;
use nbio_core::{ndebug, nerror};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Periodic work run by the timer thread
pub trait TimerTask: Send + Sync {
    /// Called once per tick. Return false to be removed.
    fn tick(&self, now: Instant) -> bool;

    fn name(&self) -> &str {
        "timer-task"
    }
}

struct Shared {
    tasks: SpinLock<Vec<Arc<dyn TimerTask>>>,
    shutdown: AtomicBool,
}

/// Background ticking thread
pub struct TimerThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    check_interval: Duration,
}

impl TimerThread {
    /// Spawn the thread; it ticks every `check_interval`
    pub fn start(name: &str, check_interval: Duration) -> Result<Self, RunnerError> {
        let shared = Arc::new(Shared {
            tasks: SpinLock::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        });
        let interval = check_interval.max(Duration::from_millis(1));
        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || timer_loop(loop_shared, interval))
            .map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;
        Ok(Self {
            shared,
            handle: Some(handle),
            check_interval: interval,
        })
    }

    pub fn add(&self, task: Arc<dyn TimerTask>) {
        self.shared.tasks.lock().push(task);
    }

    pub fn task_count(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Stop ticking and join the thread
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: Arc<Shared>, interval: Duration) {
    ndebug!("timer thread ticking every {:?}", interval);
    while !shared.shutdown.load(Ordering::Acquire) {
        thread::park_timeout(interval);
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let now = Instant::now();
        // Snapshot so tasks may add timers without deadlocking
        let tasks: Vec<Arc<dyn TimerTask>> = shared.tasks.lock().clone();
        let mut finished = Vec::new();
        for task in &tasks {
            match panic::catch_unwind(AssertUnwindSafe(|| task.tick(now))) {
                Ok(true) => {}
                Ok(false) => finished.push(Arc::as_ptr(task) as *const () as usize),
                Err(_) => {
                    nerror!("timer task {} panicked; removing it", task.name());
                    finished.push(Arc::as_ptr(task) as *const () as usize);
                }
            }
        }
        if !finished.is_empty() {
            shared
                .tasks
                .lock()
                .retain(|t| !finished.contains(&(Arc::as_ptr(t) as *const () as usize)));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        hits: AtomicUsize,
        limit: usize,
    }

    impl TimerTask for Counter {
        fn tick(&self, _now: Instant) -> bool {
            self.hits.fetch_add(1, Ordering::Relaxed) + 1 < self.limit
        }
    }

    #[test]
    fn test_ticks_until_task_finishes() {
        let mut timer = TimerThread::start("test-timer", Duration::from_millis(2)).unwrap();
        let task = Arc::new(Counter {
            hits: AtomicUsize::new(0),
            limit: 3,
        });
        timer.add(task.clone());
        let deadline = Instant::now() + Duration::from_secs(5);
        while timer.task_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(timer.task_count(), 0);
        assert_eq!(task.hits.load(Ordering::Relaxed), 3);
        timer.shutdown();
    }

    #[test]
    fn test_shutdown_is_prompt_and_repeatable() {
        let mut timer = TimerThread::start("test-timer-stop", Duration::from_secs(60)).unwrap();
        let start = Instant::now();
        timer.shutdown();
        timer.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
