//! ABI precondition violations.
//!
//! Every variant is a condition the host refuses to repair: the offending
//! guest invocation is trapped and the request fails. The bridge converts
//! these into wasmtime traps at the host-function boundary.

/// A guest violated an ABI precondition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AbiError {
    /// Guest-supplied pointer/length range falls outside linear memory.
    #[error("out-of-bounds memory access (ptr={ptr}, len={len}, memory={memory})")]
    OutOfBounds { ptr: u32, len: u32, memory: usize },

    /// Header functions require a non-empty name.
    #[error("empty header name")]
    EmptyHeaderName,

    /// Unrecognized header-kind discriminant.
    #[error("unknown header kind {0}")]
    UnknownHeaderKind(i32),

    /// Unrecognized body-kind discriminant.
    #[error("unknown body kind {0}")]
    UnknownBodyKind(i32),

    /// Operation is not legal in the current request phase.
    #[error("phase violation: {0}")]
    Phase(&'static str),

    /// Operation requires a feature the effective mask does not carry.
    #[error("feature not enabled: {0}")]
    FeatureRequired(&'static str),

    /// A string argument was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A value failed domain validation (bad method token, URI, status).
    #[error("invalid {what}: {detail}")]
    InvalidValue { what: &'static str, detail: String },
}

impl AbiError {
    pub fn invalid_value(what: &'static str, detail: impl Into<String>) -> AbiError {
        AbiError::InvalidValue {
            what,
            detail: detail.into(),
        }
    }
}
