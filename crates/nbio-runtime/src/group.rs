//! Runner group
//!
//! A fixed array of runners. New connections are assigned with a
//! wrapping round-robin counter and are never migrated afterwards.

use crate::config::RuntimeConfig;
use crate::runner::EventRunner;

use nbio_core::error::RunnerError;
use nbio_core::ninfo;

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// N event runners with round-robin assignment
pub struct RunnerGroup {
    name: String,
    runners: Vec<Arc<EventRunner>>,
    next: AtomicUsize,
}

impl RunnerGroup {
    /// Start `size` runners named `{name}-{i}`
    pub fn new(name: &str, size: usize, park_timeout: Duration) -> Result<Self, RunnerError> {
        let size = size.max(1);
        let mut runners = Vec::with_capacity(size);
        for i in 0..size {
            match EventRunner::start(i, format!("{}-{}", name, i), park_timeout) {
                Ok(r) => runners.push(r),
                Err(e) => {
                    for r in &runners {
                        r.shutdown();
                    }
                    return Err(e);
                }
            }
        }
        ninfo!("runner group {} started with {} runners", name, size);
        Ok(Self {
            name: name.to_string(),
            runners,
            next: AtomicUsize::new(0),
        })
    }

    /// IO group sized from config (`io_threads` runners)
    pub fn io_group(config: &RuntimeConfig) -> Result<Self, RunnerError> {
        Self::new(
            &format!("{}-io", config.thread_name_prefix),
            config.io_threads,
            config.park_timeout,
        )
    }

    /// Accept group sized from config (`accept_threads` runners)
    pub fn accept_group(config: &RuntimeConfig) -> Result<Self, RunnerError> {
        Self::new(
            &format!("{}-accept", config.thread_name_prefix),
            config.accept_threads,
            config.park_timeout,
        )
    }

    /// Build one attachment per runner and install it
    ///
    /// Returns the attachments in runner order.
    pub fn attach<T, E, F>(&self, mut factory: F) -> Result<Vec<Arc<T>>, E>
    where
        T: Any + Send + Sync,
        F: FnMut(&Arc<EventRunner>) -> Result<Arc<T>, E>,
    {
        let mut out = Vec::with_capacity(self.runners.len());
        for runner in &self.runners {
            let value = factory(runner)?;
            runner.set_attachment(Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
            out.push(value);
        }
        Ok(out)
    }

    /// Next runner in round-robin order
    pub fn choose(&self) -> &Arc<EventRunner> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.runners.len();
        &self.runners[i]
    }

    pub fn get(&self, index: usize) -> Option<&Arc<EventRunner>> {
        self.runners.get(index)
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EventRunner>> {
        self.runners.iter()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shut down every runner (drains and joins each)
    pub fn shutdown(&self) {
        for runner in &self.runners {
            runner.shutdown();
        }
    }
}

impl Drop for RunnerGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
