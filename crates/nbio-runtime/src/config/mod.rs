//! Runtime configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods
//! 2. Environment variables (`from_env()`)
//! 3. `defaults`
//!
//! # Example
//!
//! ```rust,ignore
//! use nbio_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env().io_threads(4);
//! config.validate()?;
//! ```

pub mod defaults;

use nbio_core::env::{env_get, env_get_ms, env_get_str};
use nbio_core::error::ConfigError;
use nbio_core::nprintln;

use std::time::Duration;

/// Thread-pool and timer settings
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Accept runners per server
    pub accept_threads: usize,
    /// IO runners per server
    pub io_threads: usize,
    /// Park time of an idle runner
    pub park_timeout: Duration,
    /// Timer thread tick (idle and read-timeout checks)
    pub check_interval: Duration,
    /// Native memory report period (zero = off)
    pub memory_report_interval: Duration,
    /// Prefix for every thread name
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn resolve_io_threads(n: usize) -> usize {
    if n == 0 {
        cpu_count()
    } else {
        n
    }
}

impl RuntimeConfig {
    /// Defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `NBIO_ACCEPT_THREADS` - accept runners
    /// - `NBIO_IO_THREADS` - IO runners (0 = CPU count)
    /// - `NBIO_PARK_TIMEOUT_MS` - idle runner park time
    /// - `NBIO_CHECK_INTERVAL_MS` - timer thread tick
    /// - `NBIO_MEMORY_REPORT_MS` - memory report period (0 = off)
    /// - `NBIO_THREAD_PREFIX` - thread name prefix
    pub fn from_env() -> Self {
        Self {
            accept_threads: env_get("NBIO_ACCEPT_THREADS", defaults::ACCEPT_THREADS),
            io_threads: resolve_io_threads(env_get("NBIO_IO_THREADS", defaults::IO_THREADS)),
            park_timeout: env_get_ms("NBIO_PARK_TIMEOUT_MS", defaults::PARK_TIMEOUT_MS),
            check_interval: env_get_ms("NBIO_CHECK_INTERVAL_MS", defaults::CHECK_INTERVAL_MS),
            memory_report_interval: env_get_ms("NBIO_MEMORY_REPORT_MS", defaults::MEMORY_REPORT_MS),
            thread_name_prefix: env_get_str("NBIO_THREAD_PREFIX", defaults::THREAD_NAME_PREFIX),
        }
    }

    /// Library defaults only (no env)
    pub fn new() -> Self {
        Self {
            accept_threads: defaults::ACCEPT_THREADS,
            io_threads: resolve_io_threads(defaults::IO_THREADS),
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            check_interval: Duration::from_millis(defaults::CHECK_INTERVAL_MS),
            memory_report_interval: Duration::from_millis(defaults::MEMORY_REPORT_MS),
            thread_name_prefix: defaults::THREAD_NAME_PREFIX.to_string(),
        }
    }

    // Builder methods

    pub fn accept_threads(mut self, n: usize) -> Self {
        self.accept_threads = n;
        self
    }

    pub fn io_threads(mut self, n: usize) -> Self {
        self.io_threads = resolve_io_threads(n);
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn check_interval(mut self, d: Duration) -> Self {
        self.check_interval = d;
        self
    }

    pub fn memory_report_interval(mut self, d: Duration) -> Self {
        self.memory_report_interval = d;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: &str) -> Self {
        self.thread_name_prefix = prefix.to_string();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accept_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "accept_threads",
                reason: "must be > 0",
            });
        }
        if self.io_threads == 0 || self.io_threads > 1024 {
            return Err(ConfigError::Invalid {
                field: "io_threads",
                reason: "must be in 1..=1024",
            });
        }
        if self.check_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "check_interval",
                reason: "must be > 0",
            });
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "thread_name_prefix",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    pub fn print(&self) {
        nprintln!("nbio runtime configuration:");
        nprintln!("  accept_threads:          {}", self.accept_threads);
        nprintln!("  io_threads:              {}", self.io_threads);
        nprintln!("  park_timeout:            {:?}", self.park_timeout);
        nprintln!("  check_interval:          {:?}", self.check_interval);
        nprintln!("  memory_report_interval:  {:?}", self.memory_report_interval);
        nprintln!("  thread_name_prefix:      {}", self.thread_name_prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_valid() {
        let config = RuntimeConfig::new();
        assert!(config.io_threads >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .accept_threads(2)
            .io_threads(3)
            .check_interval(Duration::from_millis(7))
            .thread_name_prefix("svc");
        assert_eq!(config.accept_threads, 2);
        assert_eq!(config.io_threads, 3);
        assert_eq!(config.check_interval, Duration::from_millis(7));
        assert_eq!(config.thread_name_prefix, "svc");
    }

    #[test]
    fn test_validate_rejects() {
        assert!(RuntimeConfig::new().accept_threads(0).validate().is_err());
        assert!(RuntimeConfig::new()
            .check_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RuntimeConfig::new().thread_name_prefix("").validate().is_err());
    }

    #[test]
    fn test_io_threads_zero_means_cpus() {
        assert_eq!(RuntimeConfig::new().io_threads(0).io_threads, cpu_count());
    }
}
