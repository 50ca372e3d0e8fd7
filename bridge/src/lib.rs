//! `http-wasm-bridge` — Wasmtime-based host bridge embedding http-wasm
//! guest handlers as hyper middleware.
//!
//! This crate loads an http-wasm guest module, wires up the
//! `http_handler` import module plus WASI preview1, and drives the guest
//! across the request lifecycle:
//!
//! - **Feature negotiation:** the guest raises request/response buffering
//!   and trailer support via `enable_features`
//! - **Request scoping:** per-request state lives in the Wasmtime store,
//!   reachable from every import without a request parameter
//! - **Response buffering:** the downstream response is captured so the
//!   guest can observe and rewrite it before release
//! - **Isolation:** pooled single-threaded instances, epoch deadlines,
//!   memory limits; trapped instances are ejected and replaced
//!
//! The primary entry points are [`WasmMiddleware::new`] and
//! [`WasmMiddleware::handle`].

pub mod buffer;
pub mod config;
pub mod error;
pub mod linker;
pub mod logger;
pub mod memory;
pub mod middleware;
pub mod pool;
pub mod runtime;
pub mod state;
pub mod validation;

pub use buffer::BridgeBody;
pub use config::{BridgeConfig, WasiOptions};
pub use error::BridgeError;
pub use logger::TracingLogger;
pub use middleware::Downstream;
pub use runtime::WasmMiddleware;

// The ABI vocabulary is part of the public surface.
pub use http_wasm_abi as abi;
