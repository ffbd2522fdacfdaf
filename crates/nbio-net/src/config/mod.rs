//! Network configuration
//!
//! `NetConfig` embeds the thread-level `RuntimeConfig` and adds the
//! per-session knobs: buffer sizes, timeouts, async modes and the TLS
//! handshake cap.
//!
//! # Example
//!
//! ```rust,ignore
//! use nbio_net::config::NetConfig;
//! use std::time::Duration;
//!
//! let config = NetConfig::from_env()
//!     .read_timeout(Duration::from_secs(30))
//!     .async_send(true);
//! config.validate()?;
//! ```

pub mod defaults;

use nbio_core::env::{env_get, env_get_bool, env_get_ms, env_get_size};
use nbio_core::error::ConfigError;
use nbio_core::nprintln;
use nbio_runtime::RuntimeConfig;

use std::time::Duration;

/// Session, socket and TLS settings
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Thread pools and checker tick
    pub runtime: RuntimeConfig,
    /// Read scratch size, initial channel capacity, flush threshold
    pub buffer_size: usize,
    /// Channel growth bound
    pub channel_max_size: usize,
    /// Bounded selector wait
    pub select_interval: Duration,
    /// Zero disables
    pub read_timeout: Duration,
    pub send_timeout: Duration,
    /// Zero disables
    pub idle_interval: Duration,
    /// Write channel accepts foreign-thread appends
    pub async_send: bool,
    /// Receive is queued as an event instead of processed inline
    pub async_receive: bool,
    pub handshake_max_steps: u32,
    pub max_empty_reads: u32,
    pub connect_timeout: Duration,
    pub listen_backlog: i32,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NetConfig {
    /// Defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `NBIO_BUFFER_SIZE` - accepts `k`/`m` suffixes
    /// - `NBIO_CHANNEL_MAX_SIZE` - accepts `k`/`m` suffixes
    /// - `NBIO_SELECT_INTERVAL_MS`
    /// - `NBIO_READ_TIMEOUT_MS` (0 = off)
    /// - `NBIO_SEND_TIMEOUT_MS`
    /// - `NBIO_IDLE_INTERVAL_MS` (0 = off)
    /// - `NBIO_ASYNC_SEND`, `NBIO_ASYNC_RECEIVE`
    /// - `NBIO_HANDSHAKE_MAX_STEPS`
    /// - `NBIO_MAX_EMPTY_READS`
    /// - `NBIO_CONNECT_TIMEOUT_MS`
    /// - `NBIO_LISTEN_BACKLOG`
    ///
    /// plus everything `RuntimeConfig::from_env` reads.
    pub fn from_env() -> Self {
        Self {
            runtime: RuntimeConfig::from_env(),
            buffer_size: env_get_size("NBIO_BUFFER_SIZE", defaults::BUFFER_SIZE),
            channel_max_size: env_get_size("NBIO_CHANNEL_MAX_SIZE", defaults::CHANNEL_MAX_SIZE),
            select_interval: env_get_ms("NBIO_SELECT_INTERVAL_MS", defaults::SELECT_INTERVAL_MS),
            read_timeout: env_get_ms("NBIO_READ_TIMEOUT_MS", defaults::READ_TIMEOUT_MS),
            send_timeout: env_get_ms("NBIO_SEND_TIMEOUT_MS", defaults::SEND_TIMEOUT_MS),
            idle_interval: env_get_ms("NBIO_IDLE_INTERVAL_MS", defaults::IDLE_INTERVAL_MS),
            async_send: env_get_bool("NBIO_ASYNC_SEND", defaults::ASYNC_SEND),
            async_receive: env_get_bool("NBIO_ASYNC_RECEIVE", defaults::ASYNC_RECEIVE),
            handshake_max_steps: env_get("NBIO_HANDSHAKE_MAX_STEPS", defaults::HANDSHAKE_MAX_STEPS),
            max_empty_reads: env_get("NBIO_MAX_EMPTY_READS", defaults::MAX_EMPTY_READS),
            connect_timeout: env_get_ms("NBIO_CONNECT_TIMEOUT_MS", defaults::CONNECT_TIMEOUT_MS),
            listen_backlog: env_get("NBIO_LISTEN_BACKLOG", defaults::LISTEN_BACKLOG),
        }
    }

    /// Library defaults only (no env)
    pub fn new() -> Self {
        Self {
            runtime: RuntimeConfig::new(),
            buffer_size: defaults::BUFFER_SIZE,
            channel_max_size: defaults::CHANNEL_MAX_SIZE,
            select_interval: Duration::from_millis(defaults::SELECT_INTERVAL_MS),
            read_timeout: Duration::from_millis(defaults::READ_TIMEOUT_MS),
            send_timeout: Duration::from_millis(defaults::SEND_TIMEOUT_MS),
            idle_interval: Duration::from_millis(defaults::IDLE_INTERVAL_MS),
            async_send: defaults::ASYNC_SEND,
            async_receive: defaults::ASYNC_RECEIVE,
            handshake_max_steps: defaults::HANDSHAKE_MAX_STEPS,
            max_empty_reads: defaults::MAX_EMPTY_READS,
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
            listen_backlog: defaults::LISTEN_BACKLOG,
        }
    }

    // Builder methods

    pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn accept_threads(mut self, n: usize) -> Self {
        self.runtime = self.runtime.accept_threads(n);
        self
    }

    pub fn io_threads(mut self, n: usize) -> Self {
        self.runtime = self.runtime.io_threads(n);
        self
    }

    pub fn check_interval(mut self, d: Duration) -> Self {
        self.runtime = self.runtime.check_interval(d);
        self
    }

    pub fn buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    pub fn channel_max_size(mut self, n: usize) -> Self {
        self.channel_max_size = n;
        self
    }

    pub fn select_interval(mut self, d: Duration) -> Self {
        self.select_interval = d;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn send_timeout(mut self, d: Duration) -> Self {
        self.send_timeout = d;
        self
    }

    pub fn idle_interval(mut self, d: Duration) -> Self {
        self.idle_interval = d;
        self
    }

    pub fn async_send(mut self, enabled: bool) -> Self {
        self.async_send = enabled;
        self
    }

    pub fn async_receive(mut self, enabled: bool) -> Self {
        self.async_receive = enabled;
        self
    }

    pub fn handshake_max_steps(mut self, n: u32) -> Self {
        self.handshake_max_steps = n;
        self
    }

    pub fn max_empty_reads(mut self, n: u32) -> Self {
        self.max_empty_reads = n;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                reason: "must be > 0",
            });
        }
        if self.buffer_size > self.channel_max_size {
            return Err(ConfigError::Invalid {
                field: "channel_max_size",
                reason: "must be >= buffer_size",
            });
        }
        if self.select_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "select_interval",
                reason: "must be > 0",
            });
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "send_timeout",
                reason: "must be > 0",
            });
        }
        if self.handshake_max_steps == 0 {
            return Err(ConfigError::Invalid {
                field: "handshake_max_steps",
                reason: "must be > 0",
            });
        }
        if self.max_empty_reads == 0 {
            return Err(ConfigError::Invalid {
                field: "max_empty_reads",
                reason: "must be > 0",
            });
        }
        if self.listen_backlog <= 0 {
            return Err(ConfigError::Invalid {
                field: "listen_backlog",
                reason: "must be > 0",
            });
        }
        Ok(())
    }

    pub fn print(&self) {
        self.runtime.print();
        nprintln!("nbio network configuration:");
        nprintln!("  buffer_size:          {}", self.buffer_size);
        nprintln!("  channel_max_size:     {}", self.channel_max_size);
        nprintln!("  select_interval:      {:?}", self.select_interval);
        nprintln!("  read_timeout:         {:?}", self.read_timeout);
        nprintln!("  send_timeout:         {:?}", self.send_timeout);
        nprintln!("  idle_interval:        {:?}", self.idle_interval);
        nprintln!("  async_send:           {}", self.async_send);
        nprintln!("  async_receive:        {}", self.async_receive);
        nprintln!("  handshake_max_steps:  {}", self.handshake_max_steps);
        nprintln!("  max_empty_reads:      {}", self.max_empty_reads);
        nprintln!("  connect_timeout:      {:?}", self.connect_timeout);
        nprintln!("  listen_backlog:       {}", self.listen_backlog);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetConfig::new();
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.channel_max_size, 2 * 1024 * 1024);
        assert_eq!(config.select_interval, Duration::from_millis(20));
        assert_eq!(config.send_timeout, Duration::from_millis(5000));
        assert!(config.read_timeout.is_zero());
        assert!(config.idle_interval.is_zero());
        assert_eq!(config.handshake_max_steps, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_reaches_runtime() {
        let config = NetConfig::new().io_threads(3).accept_threads(2);
        assert_eq!(config.runtime.io_threads, 3);
        assert_eq!(config.runtime.accept_threads, 2);
    }

    #[test]
    fn test_validate_rejects() {
        assert!(NetConfig::new().buffer_size(0).validate().is_err());
        assert!(NetConfig::new()
            .buffer_size(64)
            .channel_max_size(32)
            .validate()
            .is_err());
        assert!(NetConfig::new().handshake_max_steps(0).validate().is_err());
        assert!(NetConfig::new().max_empty_reads(0).validate().is_err());
        assert!(NetConfig::new()
            .select_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
