//! Default guest log sink backed by `tracing`.

use http_wasm_abi::{GuestLogger, LogLevel};

/// Routes guest `log` calls to `tracing` events under the `wasm_guest`
/// target, so guest output lands in the host's subscriber alongside bridge
/// logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl GuestLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "wasm_guest", "{message}"),
            LogLevel::Info => tracing::info!(target: "wasm_guest", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "wasm_guest", "{message}"),
            LogLevel::Error => tracing::error!(target: "wasm_guest", "{message}"),
            LogLevel::None => {}
        }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        match level {
            LogLevel::Debug => {
                tracing::enabled!(target: "wasm_guest", tracing::Level::DEBUG)
            }
            LogLevel::Info => tracing::enabled!(target: "wasm_guest", tracing::Level::INFO),
            LogLevel::Warn => tracing::enabled!(target: "wasm_guest", tracing::Level::WARN),
            LogLevel::Error => {
                tracing::enabled!(target: "wasm_guest", tracing::Level::ERROR)
            }
            LogLevel::None => false,
        }
    }
}
