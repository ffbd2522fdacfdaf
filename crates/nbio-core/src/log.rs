//! Kernel-style stderr logging for nbio
//!
//! Every line is written under the stderr lock so output from different
//! runner threads never interleaves mid-line. Lines carry the level and
//! the name of the emitting thread (`nbio-io-3`, `nbio-idle`, ...).
//!
//! # Environment Variables
//!
//! - `NBIO_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace or 0..5 (default info)
//! - `NBIO_FLUSH_EPRINT=1` - flush stderr after every line
//!
//! # Usage
//!
//! ```ignore
//! use nbio_core::{ninfo, nwarn, ndebug};
//!
//! ninfo!("server listening on {}", addr);
//! nwarn!("session {} send timeout", id);
//! ndebug!("selector {} woke with {} events", idx, n);
//! ```
//!
//! With the `quiet-logging` feature, debug and trace lines are dropped
//! regardless of the configured level.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; unknown input yields `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging from environment variables
///
/// Runs implicitly on the first log call.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Ok(val) = std::env::var("NBIO_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }
    if let Ok(val) = std::env::var("NBIO_LOG_LEVEL") {
        let level = LogLevel::parse(&val).unwrap_or(LogLevel::Info);
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Override the level programmatically (takes precedence over env)
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    if cfg!(feature = "quiet-logging") && level >= LogLevel::Debug {
        return false;
    }
    level != LogLevel::Off && level as u8 <= log_level() as u8
}

#[doc(hidden)]
pub fn _nprintln_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _nlog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let current = std::thread::current();
    let thread = current.name().unwrap_or("-");
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "[{}] [{}] ", level.tag(), thread);
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

// ============================================================================
// Public Macros
// ============================================================================

/// Print a raw line to stderr (no level, never filtered)
#[macro_export]
macro_rules! nprintln {
    () => {{
        $crate::log::_nprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::log::_nprintln_impl(format_args!($($arg)*));
    }};
}

/// Error level log
#[macro_export]
macro_rules! nerror {
    ($($arg:tt)*) => {{
        $crate::log::_nlog_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    }};
}

/// Warning level log
#[macro_export]
macro_rules! nwarn {
    ($($arg:tt)*) => {{
        $crate::log::_nlog_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    }};
}

/// Info level log
#[macro_export]
macro_rules! ninfo {
    ($($arg:tt)*) => {{
        $crate::log::_nlog_impl($crate::log::LogLevel::Info, format_args!($($arg)*));
    }};
}

/// Debug level log
#[macro_export]
macro_rules! ndebug {
    ($($arg:tt)*) => {{
        $crate::log::_nlog_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Trace level log (hot paths; arguments are only formatted when enabled)
#[macro_export]
macro_rules! ntrace {
    ($($arg:tt)*) => {{
        if $crate::log::level_enabled($crate::log::LogLevel::Trace) {
            $crate::log::_nlog_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
        }
    }};
}

// ============================================================================
// Tests
// ============================================================================
