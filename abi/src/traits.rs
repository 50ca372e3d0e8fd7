//! Host-side trait seams consumed by the bridge.

use crate::log::LogLevel;

/// Sink for the guest `log` / `log_enabled` imports.
///
/// The bridge holds one logger per middleware and calls it from inside
/// host functions, so implementations must be cheap and non-blocking.
/// `enabled` is advisory: a guest may skip formatting when it returns
/// false, but the host still accepts `log` calls at any level.
pub trait GuestLogger: Send + Sync {
    /// Record one guest log line. `message` is already validated UTF-8.
    fn log(&self, level: LogLevel, message: &str);

    /// Whether the given level is currently worth formatting for.
    fn enabled(&self, level: LogLevel) -> bool;
}

/// Logger that drops everything. Useful for tests and benchmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLogger;

impl GuestLogger for NopLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}

    fn enabled(&self, _level: LogLevel) -> bool {
        false
    }
}
