//! Bridge error types.

/// Top-level error type for the bridge crate.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    Validation(String),

    /// Guest init (`_start` / `_initialize`) trapped or exited nonzero.
    #[error("guest init failed: {0}")]
    Init(String),

    /// Guest trapped during a request. The instance is discarded.
    #[error("guest trapped: {0}")]
    GuestTrap(String),

    /// Guest invocation exceeded the configured deadline. The instance is
    /// discarded.
    #[error("guest invocation deadline exceeded")]
    Deadline,

    /// Reading a request or response body stream failed.
    ///
    /// A request pre-read failure surfaces directly; a downstream capture
    /// failure is reported to the guest as `is_error` instead. A failed
    /// downstream handler itself never becomes a `BridgeError` — the guest
    /// always observes it through `handle_response(_, 1)`.
    #[error("body read failed: {0}")]
    Body(#[from] hyper::Error),
}

impl BridgeError {
    /// True for errors that poison the guest instance.
    pub fn is_trap(&self) -> bool {
        matches!(self, BridgeError::GuestTrap(_) | BridgeError::Deadline)
    }

    /// Classify a failed guest call: epoch-deadline interrupts become
    /// `Deadline`, everything else is a plain trap.
    pub fn from_guest_call(err: anyhow::Error) -> BridgeError {
        if let Some(trap) = err.downcast_ref::<wasmtime::Trap>() {
            if *trap == wasmtime::Trap::Interrupt {
                return BridgeError::Deadline;
            }
        }
        BridgeError::GuestTrap(format!("{err:#}"))
    }
}
