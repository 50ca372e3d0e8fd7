//! Per-instance and per-request mutable state held in the Wasmtime Store.
//!
//! `HostState` lives inside `Store<HostState>` for the lifetime of a guest
//! instance; `RequestState` is installed for the duration of one request so
//! every `http_handler` import can resolve the in-flight request through
//! the `Caller` without a request parameter.
//!
//! All ABI phase and feature rules are enforced here on plain data, which
//! keeps them testable without an engine. Violations return `AbiError`;
//! the linker converts those into traps.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::PathAndQuery;
use hyper::http::Extensions;
use hyper::{Method, StatusCode, Version};
use wasmtime::StoreLimits;
use wasmtime_wasi::preview1::WasiP1Ctx;

use http_wasm_abi::{AbiError, BodyKind, Features, GuestLogger, HeaderKind};

use crate::buffer::{BridgeBody, ResponseBuffer};

/// Store data for one guest instance.
pub struct HostState {
    /// WASI preview1 context backing the guest's system interface.
    pub wasi: WasiP1Ctx,
    /// Linear memory limiter.
    pub limits: StoreLimits,
    /// Opaque config blob surfaced via `get_config`.
    pub guest_config: Arc<Vec<u8>>,
    /// Feature mask raised by the guest during init. The first instance's
    /// mask becomes the middleware mask.
    pub instance_features: Features,
    /// Sink for the guest `log` import.
    pub logger: Arc<dyn GuestLogger>,
    /// The in-flight request, present only between scope entry and exit.
    pub request: Option<RequestState>,
}

impl HostState {
    pub fn new(
        wasi: WasiP1Ctx,
        limits: StoreLimits,
        guest_config: Arc<Vec<u8>>,
        logger: Arc<dyn GuestLogger>,
    ) -> HostState {
        HostState {
            wasi,
            limits,
            guest_config,
            instance_features: Features::NONE,
            logger,
            request: None,
        }
    }

    /// Resolve the current request; imports that need one trap outside a
    /// request scope.
    pub fn request_mut(&mut self) -> Result<&mut RequestState, AbiError> {
        self.request
            .as_mut()
            .ok_or(AbiError::Phase("no request in scope"))
    }

    /// `enable_features`: request-scoped when a request is in flight,
    /// instance-scoped during init. Returns the resulting mask.
    pub fn enable_features(&mut self, want: Features) -> Features {
        match self.request.as_mut() {
            Some(request) => request.enable_features(want),
            None => {
                self.instance_features |= want;
                self.instance_features
            }
        }
    }
}

/// State for one in-flight request.
pub struct RequestState {
    pub method: Method,
    /// Request path + query, as surfaced by `get_uri` / replaced by
    /// `set_uri`. Kept as a string so an empty rewrite is representable.
    pub uri: String,
    pub version: Version,
    pub request_headers: HeaderMap,
    pub request_trailers: HeaderMap,
    /// Pre-read request body; meaningful only when `BUFFER_REQUEST` was in
    /// the mask at entry (`request_body_buffered`). Reads stream this and
    /// never observe guest writes.
    pub request_body: Bytes,
    pub request_body_buffered: bool,
    /// Guest-written replacement body. `Some` is the sticky replaced flag:
    /// the first `write_body` creates it, later calls append, and it
    /// supersedes the original when the request is forwarded.
    pub request_body_out: Option<BytesMut>,
    /// Unconsumed request body stream on the pass-through path.
    pub request_stream: Option<Body>,
    /// Original request extensions, restored on the rebuilt downstream
    /// request.
    pub request_extensions: Extensions,
    pub source_addr: Option<SocketAddr>,

    /// Per-request feature mask; starts from the middleware mask and may be
    /// raised by the guest, never lowered, never carried to a later request.
    features: Features,
    pub next_called: bool,

    pub response_status: StatusCode,
    pub response_version: Option<Version>,
    pub response_headers: HeaderMap,
    pub response_extensions: Extensions,
    /// Captured downstream payload (body read source + trailers) when
    /// buffering is on.
    pub response_buffer: ResponseBuffer,
    /// Guest-written response body for the current phase: the direct
    /// response before `next`, the rewrite after. `Some` is the sticky
    /// replaced flag; it resets at the phase boundary.
    pub response_body_out: Option<BytesMut>,
    /// Unconsumed downstream body on the pass-through path.
    pub response_stream: Option<BridgeBody>,

    pub request_body_cursor: usize,
    pub response_body_cursor: usize,
}

impl RequestState {
    pub fn new(features: Features) -> RequestState {
        RequestState {
            method: Method::GET,
            uri: "/".to_string(),
            version: Version::HTTP_11,
            request_headers: HeaderMap::new(),
            request_trailers: HeaderMap::new(),
            request_body: Bytes::new(),
            request_body_buffered: false,
            request_body_out: None,
            request_stream: None,
            request_extensions: Extensions::new(),
            source_addr: None,
            features,
            next_called: false,
            response_status: StatusCode::OK,
            response_version: None,
            response_headers: HeaderMap::new(),
            response_extensions: Extensions::new(),
            response_buffer: ResponseBuffer::new(),
            response_body_out: None,
            response_stream: None,
            request_body_cursor: 0,
            response_body_cursor: 0,
        }
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn enable_features(&mut self, want: Features) -> Features {
        self.features |= want;
        self.features
    }

    /// Transition into the response phase: `next` has run. The sticky
    /// replace flag resets at this phase boundary, and any direct-response
    /// bytes written before `next` are superseded by the downstream
    /// response.
    pub fn begin_response_phase(&mut self) {
        self.next_called = true;
        self.response_body_out = None;
    }

    fn require_feature(&self, feature: Features, name: &'static str) -> Result<(), AbiError> {
        if self.features.contains(feature) {
            Ok(())
        } else {
            Err(AbiError::FeatureRequired(name))
        }
    }

    fn check_trailer_access(&self, kind: HeaderKind) -> Result<(), AbiError> {
        if kind.is_trailers() {
            self.require_feature(Features::TRAILERS, "trailers")?;
        }
        if kind == HeaderKind::RequestTrailers {
            // Request trailers arrive after the body; without the pre-read
            // they are never materialized, so access would silently observe
            // an empty map.
            self.require_feature(Features::BUFFER_REQUEST, "buffer-request")?;
        }
        Ok(())
    }

    fn headers(&self, kind: HeaderKind) -> Result<&HeaderMap, AbiError> {
        self.check_trailer_access(kind)?;
        Ok(match kind {
            HeaderKind::Request => &self.request_headers,
            HeaderKind::Response => &self.response_headers,
            HeaderKind::RequestTrailers => &self.request_trailers,
            HeaderKind::ResponseTrailers => &self.response_buffer.trailers,
        })
    }

    fn headers_mut(&mut self, kind: HeaderKind) -> Result<&mut HeaderMap, AbiError> {
        self.check_trailer_access(kind)?;
        match kind {
            HeaderKind::Request | HeaderKind::RequestTrailers if self.next_called => {
                return Err(AbiError::Phase(
                    "request headers are not writable after next",
                ));
            }
            _ => {}
        }
        Ok(match kind {
            HeaderKind::Request => &mut self.request_headers,
            HeaderKind::Response => &mut self.response_headers,
            HeaderKind::RequestTrailers => &mut self.request_trailers,
            HeaderKind::ResponseTrailers => &mut self.response_buffer.trailers,
        })
    }

    fn parse_name(name: &[u8]) -> Result<HeaderName, AbiError> {
        if name.is_empty() {
            return Err(AbiError::EmptyHeaderName);
        }
        HeaderName::from_bytes(name).map_err(|e| AbiError::invalid_value("header name", e.to_string()))
    }

    fn parse_value(value: &[u8]) -> Result<HeaderValue, AbiError> {
        HeaderValue::from_bytes(value)
            .map_err(|e| AbiError::invalid_value("header value", e.to_string()))
    }

    /// Header names for `get_header_names`, in map order.
    pub fn header_names(&self, kind: HeaderKind) -> Result<Vec<String>, AbiError> {
        Ok(self
            .headers(kind)?
            .keys()
            .map(|name| name.as_str().to_string())
            .collect())
    }

    /// Values for one name, for `get_header_values`.
    ///
    /// `set-cookie` keeps its list-of-values shape; any other multi-valued
    /// header collapses to a single comma-joined item.
    pub fn header_values(&self, kind: HeaderKind, name: &[u8]) -> Result<Vec<Vec<u8>>, AbiError> {
        let name = Self::parse_name(name)?;
        let map = self.headers(kind)?;
        let values: Vec<&[u8]> = map.get_all(&name).iter().map(HeaderValue::as_bytes).collect();

        if values.len() <= 1 || name == hyper::header::SET_COOKIE {
            return Ok(values.into_iter().map(<[u8]>::to_vec).collect());
        }
        Ok(vec![values.join(&b", "[..])])
    }

    /// `set_header_value`: replace the named header with a single value.
    pub fn set_header(
        &mut self,
        kind: HeaderKind,
        name: &[u8],
        value: &[u8],
    ) -> Result<(), AbiError> {
        let name = Self::parse_name(name)?;
        let value = Self::parse_value(value)?;
        self.headers_mut(kind)?.insert(name, value);
        Ok(())
    }

    /// `add_header_value`: append a value to the named header.
    pub fn add_header(
        &mut self,
        kind: HeaderKind,
        name: &[u8],
        value: &[u8],
    ) -> Result<(), AbiError> {
        let name = Self::parse_name(name)?;
        let value = Self::parse_value(value)?;
        self.headers_mut(kind)?.append(name, value);
        Ok(())
    }

    /// `remove_header`: drop all values for the named header.
    pub fn remove_header(&mut self, kind: HeaderKind, name: &[u8]) -> Result<(), AbiError> {
        let name = Self::parse_name(name)?;
        let map = self.headers_mut(kind)?;
        while map.remove(&name).is_some() {}
        Ok(())
    }

    /// Stream up to `max` bytes of the selected body from the per-request
    /// cursor. Returns the chunk and whether end-of-stream was reached.
    ///
    /// Reads always stream the original payload (pre-read request body or
    /// captured response body); guest writes go to a separate replacement
    /// and are never re-read.
    pub fn read_body(&mut self, kind: BodyKind, max: usize) -> Result<(Vec<u8>, bool), AbiError> {
        let (body, cursor): (&[u8], _) = match kind {
            BodyKind::Request => {
                self.require_feature(Features::BUFFER_REQUEST, "buffer-request")?;
                (&self.request_body, &mut self.request_body_cursor)
            }
            BodyKind::Response => {
                if !self.next_called {
                    return Err(AbiError::Phase(
                        "response body is not readable before next",
                    ));
                }
                self.require_feature(Features::BUFFER_RESPONSE, "buffer-response")?;
                (&self.response_buffer.body, &mut self.response_body_cursor)
            }
        };

        let start = (*cursor).min(body.len());
        let end = start.saturating_add(max).min(body.len());
        let chunk = body[start..end].to_vec();
        *cursor = end;
        Ok((chunk, end == body.len()))
    }

    /// `write_body`: the first call within a phase starts a replacement
    /// body, subsequent calls append to it.
    pub fn write_body(&mut self, kind: BodyKind, bytes: &[u8]) -> Result<(), AbiError> {
        match kind {
            BodyKind::Request => {
                if self.next_called {
                    return Err(AbiError::Phase(
                        "request body is not writable in the response phase",
                    ));
                }
                self.request_body_out
                    .get_or_insert_with(BytesMut::new)
                    .extend_from_slice(bytes);
            }
            BodyKind::Response => {
                if self.next_called {
                    self.require_feature(Features::BUFFER_RESPONSE, "buffer-response")?;
                }
                self.response_body_out
                    .get_or_insert_with(BytesMut::new)
                    .extend_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// `set_uri`: replace the path + query. Empty input is legal and sets
    /// the empty URI; anything else must parse.
    pub fn set_uri(&mut self, raw: &[u8]) -> Result<(), AbiError> {
        if raw.is_empty() {
            self.uri.clear();
            return Ok(());
        }
        let s = std::str::from_utf8(raw).map_err(|_| AbiError::InvalidUtf8("uri"))?;
        PathAndQuery::try_from(s).map_err(|e| AbiError::invalid_value("uri", e.to_string()))?;
        self.uri = s.to_string();
        Ok(())
    }

    /// `set_method`: replace the request method.
    pub fn set_method(&mut self, raw: &[u8]) -> Result<(), AbiError> {
        if self.next_called {
            return Err(AbiError::Phase("method is not writable after next"));
        }
        self.method =
            Method::from_bytes(raw).map_err(|e| AbiError::invalid_value("method", e.to_string()))?;
        Ok(())
    }

    /// `set_status_code`.
    pub fn set_status(&mut self, code: i32) -> Result<(), AbiError> {
        let code = u16::try_from(code)
            .map_err(|_| AbiError::invalid_value("status code", code.to_string()))?;
        self.response_status = StatusCode::from_u16(code)
            .map_err(|e| AbiError::invalid_value("status code", e.to_string()))?;
        Ok(())
    }

    /// Normalized protocol version string for `get_protocol_version`.
    pub fn protocol_version(&self) -> String {
        let normalized = if self.version == Version::HTTP_09 {
            "HTTP/0.9"
        } else if self.version == Version::HTTP_10 {
            "HTTP/1.0"
        } else if self.version == Version::HTTP_11 {
            "HTTP/1.1"
        } else if self.version == Version::HTTP_2 {
            "HTTP/2.0"
        } else if self.version == Version::HTTP_3 {
            "HTTP/3.0"
        } else {
            return format!("{:?}", self.version);
        };
        normalized.to_string()
    }

    /// Client peer address for `get_source_addr`; empty when unknown.
    pub fn source_addr_string(&self) -> String {
        self.source_addr.map(|addr| addr.to_string()).unwrap_or_default()
    }
}
