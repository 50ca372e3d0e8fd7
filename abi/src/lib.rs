//! `http-wasm-abi` — ABI vocabulary for the http-wasm handler contract.
//!
//! This crate defines the host-side interface constants the bridge
//! implements when driving an http-wasm guest. It provides:
//!
//! - `Features` — the feature bitmask negotiated via `enable_features`
//! - `HeaderKind` / `BodyKind` — collection selectors for header/body calls
//! - `LogLevel` — guest log levels
//! - packed 64-bit return codecs (count+bytes, eof+len, ctx+next)
//! - `AbiError` — precondition violations that trap the guest
//! - `GuestLogger` trait — pluggable sink for the guest `log` import
//!
//! Everything here is framework-free; the bridge crate owns wasmtime and
//! the HTTP stack.

pub mod codec;
pub mod error;
pub mod features;
pub mod kinds;
pub mod log;
pub mod traits;

// Re-export commonly used types at the crate root.
pub use error::AbiError;
pub use features::Features;
pub use kinds::{BodyKind, HeaderKind};
pub use log::LogLevel;
pub use traits::{GuestLogger, NopLogger};

/// Import module name the guest links its handler functions against.
pub const HTTP_HANDLER_MODULE: &str = "http_handler";

/// Required guest export: the linear memory.
pub const EXPORT_MEMORY: &str = "memory";
/// Required guest export: request entry point, `() -> i64`.
pub const EXPORT_HANDLE_REQUEST: &str = "handle_request";
/// Required guest export: response entry point, `(i32, i32) -> ()`.
pub const EXPORT_HANDLE_RESPONSE: &str = "handle_response";
/// Optional one-shot init export (WASI command style).
pub const EXPORT_START: &str = "_start";
/// Optional one-shot init export (reactor style).
pub const EXPORT_INITIALIZE: &str = "_initialize";
