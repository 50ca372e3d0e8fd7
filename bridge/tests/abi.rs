//! ABI surface tests: marshaling protocols, request introspection and
//! mutation, context preservation, and per-request feature negotiation.

mod common;

use std::net::SocketAddr;

use hyper::header::HeaderValue;
use hyper::{Method, StatusCode};

use http_wasm_bridge::BridgeConfig;

use common::*;

// ── Introspection echo (direct response) ──

// Reads method, URI, protocol version, source address, and config through
// the write-if-fits protocol (size query first, then an exact-size read)
// and reflects them as response headers.
const ECHO_GUEST: &str = r#"
    (module
        (import "http_handler" "get_method" (func $gm (param i32 i32) (result i32)))
        (import "http_handler" "get_uri" (func $gu (param i32 i32) (result i32)))
        (import "http_handler" "get_protocol_version"
            (func $gpv (param i32 i32) (result i32)))
        (import "http_handler" "get_source_addr" (func $gsa (param i32 i32) (result i32)))
        (import "http_handler" "get_config" (func $gc (param i32 i32) (result i32)))
        (import "http_handler" "set_header_value"
            (func $shv (param i32 i32 i32 i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "x-method")
        (data (i32.const 16) "x-uri")
        (data (i32.const 32) "x-proto")
        (data (i32.const 48) "x-src")
        (data (i32.const 64) "x-config")
        (func $echo (param $name i32) (param $name_len i32) (param $len i32)
            (call $shv (i32.const 1) (local.get $name) (local.get $name_len)
                (i32.const 1024) (local.get $len)))
        (func (export "handle_request") (result i64)
            (local $len i32)
            ;; size query with buf_limit == 0, then the sized read
            (local.set $len (call $gm (i32.const 1024) (i32.const 0)))
            (drop (call $gm (i32.const 1024) (local.get $len)))
            (call $echo (i32.const 0) (i32.const 8) (local.get $len))
            (call $echo (i32.const 16) (i32.const 5)
                (call $gu (i32.const 1024) (i32.const 256)))
            (call $echo (i32.const 32) (i32.const 7)
                (call $gpv (i32.const 1024) (i32.const 256)))
            (call $echo (i32.const 48) (i32.const 5)
                (call $gsa (i32.const 1024) (i32.const 256)))
            (call $echo (i32.const 64) (i32.const 8)
                (call $gc (i32.const 1024) (i32.const 256)))
            (i64.const 0))
        (func (export "handle_response") (param i32 i32))
    )
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_introspection_round_trip() {
    let mw = middleware_with(
        ECHO_GUEST,
        BridgeConfig::with_guest_config(b"open sesame".to_vec()),
    );
    let next = RecordingNext::fixed("unused");

    let mut req = get("/v1.0/hello?name=teddy");
    *req.method_mut() = Method::DELETE;
    let addr: SocketAddr = "192.0.2.1:4242".parse().unwrap();
    req.extensions_mut().insert(addr);

    let response = collect(mw.handle(req, next.as_ref()).await).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.get("x-method").unwrap(), "DELETE");
    assert_eq!(response.headers.get("x-uri").unwrap(), "/v1.0/hello?name=teddy");
    assert_eq!(response.headers.get("x-proto").unwrap(), "HTTP/1.1");
    assert_eq!(response.headers.get("x-src").unwrap(), "192.0.2.1:4242");
    assert_eq!(response.headers.get("x-config").unwrap(), "open sesame");
    assert_eq!(next.count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_source_addr_empty_without_peer() {
    let mw = middleware(ECHO_GUEST);
    let next = RecordingNext::fixed("unused");

    let response = collect(mw.handle(get("/"), next.as_ref()).await).await;
    assert_eq!(response.headers.get("x-src").unwrap(), "");
}

// ── Request mutation before next ──

const MUTATE_REQUEST_GUEST: &str = r#"
    (module
        (import "http_handler" "remove_header" (func $rh (param i32 i32 i32)))
        (import "http_handler" "add_header_value"
            (func $ahv (param i32 i32 i32 i32 i32)))
        (import "http_handler" "set_method" (func $sm (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "authorization")
        (data (i32.const 16) "x-added")
        (data (i32.const 32) "yes")
        (data (i32.const 40) "PUT")
        (func (export "handle_request") (result i64)
            (call $rh (i32.const 0) (i32.const 0) (i32.const 13))
            (call $ahv (i32.const 0) (i32.const 16) (i32.const 7)
                (i32.const 32) (i32.const 3))
            (call $sm (i32.const 40) (i32.const 3))
            (i64.const 1))
        (func (export "handle_response") (param i32 i32))
    )
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_request_mutation_observed_by_downstream() {
    let mw = middleware(MUTATE_REQUEST_GUEST);
    let next = RecordingNext::fixed("ok");

    let mut req = get("/");
    req.headers_mut()
        .insert("authorization", HeaderValue::from_static("Basic secret"));

    collect(mw.handle(req, next.as_ref()).await).await;

    let observed = next.last();
    assert_eq!(observed.method, Method::PUT);
    assert!(observed.headers.get("authorization").is_none());
    assert_eq!(observed.headers.get("x-added").unwrap(), "yes");
}

// ── Context preservation ──

// handle_request packs an opaque context into the high word; the host must
// hand it back bit-exact. A mismatch traps (unreachable), failing the
// request.
const CTX_GUEST: &str = r#"
    (module
        (memory (export "memory") 1)
        (func (export "handle_request") (result i64)
            i64.const 0xdeadbeef00000001)
        (func (export "handle_response") (param $ctx i32) (param $err i32)
            (if (i32.ne (local.get $ctx) (i32.const 0xdeadbeef))
                (then unreachable)))
    )
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_context_value_preserved_bit_exact() {
    let mw = middleware(CTX_GUEST);
    let next = RecordingNext::fixed("ok");

    let response = collect(mw.handle(get("/"), next.as_ref()).await).await;
    // 0xdeadbeef has the sign bit set; a signed shift anywhere in the
    // plumbing would corrupt it and the guest would trap to a 500.
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"ok");
}

// ── Body round-trip property ──

// Reads the request body in 8-byte chunks until EOF, writing back exactly
// what it read; the downstream handler must observe the body unchanged.
const ROUND_TRIP_GUEST: &str = r#"
    (module
        (import "http_handler" "enable_features" (func $ef (param i32) (result i32)))
        (import "http_handler" "read_body" (func $rb (param i32 i32 i32) (result i64)))
        (import "http_handler" "write_body" (func $wb (param i32 i32 i32)))
        (memory (export "memory") 2)
        (func (export "_initialize") (drop (call $ef (i32.const 1))))
        (func (export "handle_request") (result i64)
            (local $r i64)
            (block $done
                (loop $loop
                    (local.set $r
                        (call $rb (i32.const 0) (i32.const 1024) (i32.const 8)))
                    (call $wb (i32.const 0) (i32.const 1024)
                        (i32.wrap_i64 (local.get $r)))
                    (br_if $done
                        (i64.ne
                            (i64.and (local.get $r) (i64.const 0x100000000))
                            (i64.const 0)))
                    (br $loop)))
            (i64.const 1))
        (func (export "handle_response") (param i32 i32))
    )
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_read_then_rewrite_is_identity() {
    let mw = middleware(ROUND_TRIP_GUEST);
    let next = RecordingNext::echo();

    let payload = "the quick brown fox jumps over the lazy dog";
    let response = collect(mw.handle(post("/", payload), next.as_ref()).await).await;

    assert_eq!(next.last().body, payload.as_bytes());
    assert_eq!(response.body, payload.as_bytes());
}

// ── Per-request feature raise ──

// Raises BUFFER_RESPONSE during handle_request only when the x-raise
// header is present; handle_response always tries to rewrite the body.
const RAISE_GUEST: &str = r#"
    (module
        (import "http_handler" "enable_features" (func $ef (param i32) (result i32)))
        (import "http_handler" "get_header_values"
            (func $ghv (param i32 i32 i32 i32 i32) (result i64)))
        (import "http_handler" "write_body" (func $wb (param i32 i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "x-raise")
        (data (i32.const 16) "rewritten")
        (func (export "handle_request") (result i64)
            (if (i64.ne
                    (call $ghv (i32.const 0) (i32.const 0) (i32.const 7)
                        (i32.const 512) (i32.const 256))
                    (i64.const 0))
                (then (drop (call $ef (i32.const 2)))))
            (i64.const 1))
        (func (export "handle_response") (param i32 i32)
            (call $wb (i32.const 1) (i32.const 16) (i32.const 9)))
    )
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_request_scoped_feature_raise_does_not_leak() {
    let mw = middleware(RAISE_GUEST);
    let next = RecordingNext::fixed("downstream");

    // Request 1 raises BUFFER_RESPONSE; the rewrite succeeds.
    let mut req = get("/");
    req.headers_mut().insert("x-raise", HeaderValue::from_static("1"));
    let response = collect(mw.handle(req, next.as_ref()).await).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"rewritten");

    // Request 2 does not raise: the per-request mask is rebuilt from the
    // middleware mask, so the unbuffered rewrite traps to a 500.
    let response = collect(mw.handle(get("/"), next.as_ref()).await).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.body.is_empty());
}
