//! Minimal leveled logging to stderr.
//!
//! Lines carry a raw Unix timestamp (seconds and milliseconds) rather than
//! a civil date: the chain already thinks in millisecond timestamps, and
//! log lines are correlated against block times, not wall calendars.

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        })
    }
}

static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Sets the minimum level that will be written.
pub fn init(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns true if messages at `level` pass the filter.
#[inline]
pub fn enabled(level: Level) -> bool {
    level as u8 >= MIN_LEVEL.load(Ordering::Relaxed)
}

/// Writes one log line to stderr if `level` passes the filter.
pub fn log(level: Level, message: &str) {
    if !enabled(level) {
        return;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    eprintln!(
        "[{}.{:03}] [{:5}] {}",
        now.as_secs(),
        now.subsec_millis(),
        level,
        message
    );
}

/// Logs an info-level message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::utils::log::log($crate::utils::log::Level::Info, &format!($($arg)*))
    };
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::utils::log::log($crate::utils::log::Level::Warn, &format!($($arg)*))
    };
}

/// Logs an error-level message.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::utils::log::log($crate::utils::log::Level::Error, &format!($($arg)*))
    };
}
