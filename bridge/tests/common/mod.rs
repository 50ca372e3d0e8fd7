//! Shared test helpers for integration tests.
//!
//! Provides middleware factories, a recording downstream handler, response
//! collectors, and a collecting guest logger used across all integration
//! test files. Guest modules are written as WAT; wasmtime compiles them
//! directly.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use hyper::body::{Body, HttpBody};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};

use http_wasm_bridge::abi::{GuestLogger, LogLevel};
use http_wasm_bridge::{BridgeBody, BridgeConfig, Downstream, WasmMiddleware};

// ── Middleware Factories ──

pub fn middleware(wat: &str) -> Arc<WasmMiddleware> {
    middleware_with(wat, BridgeConfig::default())
}

pub fn middleware_with(wat: &str, config: BridgeConfig) -> Arc<WasmMiddleware> {
    WasmMiddleware::new(wat, config).expect("guest module must load")
}

// ── Request Builders ──

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request must build")
}

pub fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(body.into())
        .expect("request must build")
}

// ── Downstream Handlers ──

/// What the downstream handler observed for one call.
#[derive(Clone, Debug)]
pub struct ObservedRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

type Responder = Box<dyn Fn(&ObservedRequest) -> Response<BridgeBody> + Send + Sync>;

/// Downstream handler that records every request it sees and answers with
/// a configurable response.
pub struct RecordingNext {
    calls: Mutex<Vec<ObservedRequest>>,
    respond: Responder,
}

impl RecordingNext {
    pub fn new(
        respond: impl Fn(&ObservedRequest) -> Response<BridgeBody> + Send + Sync + 'static,
    ) -> Arc<RecordingNext> {
        Arc::new(RecordingNext {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    /// Respond 200 with a fixed body.
    pub fn fixed(body: &'static str) -> Arc<RecordingNext> {
        Self::new(move |_| Response::new(BridgeBody::from_bytes(Bytes::from_static(body.as_bytes()))))
    }

    /// Echo the observed request body back verbatim.
    pub fn echo() -> Arc<RecordingNext> {
        Self::new(|observed| Response::new(BridgeBody::from_bytes(observed.body.clone())))
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last(&self) -> ObservedRequest {
        self.calls
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("downstream was never called")
    }
}

#[async_trait]
impl Downstream for RecordingNext {
    async fn call(&self, req: Request<Body>) -> anyhow::Result<Response<BridgeBody>> {
        let (parts, body) = req.into_parts();
        let body = hyper::body::to_bytes(body).await?;
        let observed = ObservedRequest {
            method: parts.method,
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body: body.to_vec(),
        };
        let response = (self.respond)(&observed);
        self.calls.lock().unwrap().push(observed);
        Ok(response)
    }
}

/// Downstream that always fails, for `is_error` paths.
pub struct FailingNext;

#[async_trait]
impl Downstream for FailingNext {
    async fn call(&self, _req: Request<Body>) -> anyhow::Result<Response<BridgeBody>> {
        anyhow::bail!("backend unavailable")
    }
}

// ── Response Collector ──

pub struct CollectedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub trailers: Option<HeaderMap>,
}

/// Drain a middleware response: body frames, then trailers.
pub async fn collect(response: Response<BridgeBody>) -> CollectedResponse {
    let (parts, mut body) = response.into_parts();
    let mut data = Vec::new();
    while let Some(chunk) = body.data().await {
        data.extend_from_slice(&chunk.expect("body chunk must be readable"));
    }
    let trailers = body.trailers().await.expect("trailers must be readable");
    CollectedResponse {
        status: parts.status,
        headers: parts.headers,
        body: data,
        trailers,
    }
}

// ── Guest Logger ──

/// Guest logger that collects every line for assertions.
#[derive(Default)]
pub struct CollectingLogger {
    pub lines: Mutex<Vec<(LogLevel, String)>>,
}

impl GuestLogger for CollectingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }

    fn enabled(&self, _level: LogLevel) -> bool {
        true
    }
}

// ── Shared Guests ──

/// Guest that proceeds without touching anything.
pub const PROCEED_GUEST: &str = r#"
    (module
        (memory (export "memory") 1)
        (func (export "handle_request") (result i64) i64.const 1)
        (func (export "handle_response") (param i32 i32))
    )
"#;
