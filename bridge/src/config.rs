//! Bridge configuration.

use std::time::Duration;

/// Configuration for a guest middleware.
///
/// Controls the config blob surfaced to `get_config`, pool sizing, memory
/// limits, invocation deadlines, and WASI pass-through options.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Opaque bytes surfaced verbatim to the guest via `get_config`.
    pub guest_config: Vec<u8>,

    /// Number of guest instances kept in the pool. Each instance serves
    /// one request at a time; requests beyond the pool size queue.
    pub pool_size: usize,

    /// Maximum linear memory per instance, in bytes.
    pub max_memory_bytes: usize,

    /// Wall-clock budget for a single guest invocation (init,
    /// `handle_request`, or `handle_response`). Enforced via epoch
    /// interruption; an expired invocation traps the instance.
    pub invocation_timeout: Duration,

    /// WASI options passed through to the guest's system interface.
    pub wasi: WasiOptions,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            guest_config: Vec::new(),
            pool_size: 1,
            max_memory_bytes: 64 * 1024 * 1024, // 64 MiB
            invocation_timeout: Duration::from_secs(10),
            wasi: WasiOptions::default(),
        }
    }
}

impl BridgeConfig {
    /// Convenience: default config with a guest config blob.
    pub fn with_guest_config(guest_config: impl Into<Vec<u8>>) -> Self {
        Self {
            guest_config: guest_config.into(),
            ..Self::default()
        }
    }
}

/// Options forwarded to the guest's WASI preview1 context.
///
/// The host neither interprets nor constrains the system interface beyond
/// wiring these through; stdout/stderr inheritance is the primary use.
#[derive(Debug, Clone)]
pub struct WasiOptions {
    pub inherit_stdout: bool,
    pub inherit_stderr: bool,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Default for WasiOptions {
    fn default() -> Self {
        Self {
            inherit_stdout: true,
            inherit_stderr: true,
            args: Vec::new(),
            env: Vec::new(),
        }
    }
}
