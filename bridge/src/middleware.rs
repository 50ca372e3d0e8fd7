//! The request lifecycle driver.
//!
//! For each request: optionally pre-read the body, check out a guest
//! instance, enter the request scope, invoke `handle_request`, run the
//! downstream handler when the guest asked to proceed, capture the
//! response, invoke `handle_response`, release the buffered response, and
//! tear the scope down. Guest invocations run on the blocking thread pool
//! so they never stall the async runtime; if the request is cancelled
//! mid-invocation, the blocking side disposes of the instance itself so
//! the pool never leaks a slot.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{Request, Response, StatusCode, Uri};

use http_wasm_abi::codec::split_ctx_next;
use http_wasm_abi::Features;

use crate::buffer::{drain_body, BridgeBody, ResponseBuffer};
use crate::error::BridgeError;
use crate::pool::{GuestInstance, InstancePool};
use crate::runtime::{GuestFactory, WasmMiddleware};
use crate::state::RequestState;

/// The next handler in the chain.
///
/// Takes the (possibly guest-rewritten) request and produces the response
/// the guest will observe. Returning `BridgeBody` keeps middleware
/// composable: a downstream hyper body wraps via [`BridgeBody::stream`],
/// and another `WasmMiddleware` plugs in directly.
///
/// Implemented for any `Fn(Request<Body>) -> impl Future<Output =
/// anyhow::Result<Response<BridgeBody>>>`, so plain async closures compose
/// directly.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, req: Request<Body>) -> anyhow::Result<Response<BridgeBody>>;
}

#[async_trait]
impl<F, Fut> Downstream for F
where
    F: Fn(Request<Body>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Response<BridgeBody>>> + Send + 'static,
{
    async fn call(&self, req: Request<Body>) -> anyhow::Result<Response<BridgeBody>> {
        (self)(req).await
    }
}

impl WasmMiddleware {
    /// Run one request through the guest, composing with `next`.
    ///
    /// Guest and host failures surface as an empty 500 response; the
    /// underlying error is logged.
    pub async fn handle(&self, req: Request<Body>, next: &dyn Downstream) -> Response<BridgeBody> {
        match self.drive(req, next).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, "wasm middleware request failed");
                internal_error()
            }
        }
    }

    async fn drive(
        &self,
        req: Request<Body>,
        next: &dyn Downstream,
    ) -> Result<Response<BridgeBody>, BridgeError> {
        let (parts, body) = req.into_parts();

        let mut state = RequestState::new(self.features);
        state.method = parts.method;
        state.uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        state.version = parts.version;
        state.request_headers = parts.headers;
        state.source_addr = parts.extensions.get::<SocketAddr>().copied();
        state.request_extensions = parts.extensions;

        // Pre-read happens before any guest code runs; host functions must
        // never suspend.
        if self.features.contains(Features::BUFFER_REQUEST) {
            let (data, trailers) = drain_body(body).await?;
            state.request_body = data.freeze();
            state.request_trailers = trailers;
            state.request_body_buffered = true;
        } else {
            state.request_stream = Some(body);
        }

        let mut instance = self.pool.checkout().await?;
        instance.state_mut().request = Some(state);

        let (mut instance, call) = self
            .invoke(instance, |guest| guest.call_handle_request())
            .await?;
        let ctx_next = match call {
            Ok(value) => value,
            Err(err) => {
                self.retire(instance);
                return Err(err);
            }
        };
        let (ctx, proceed) = split_ctx_next(ctx_next);

        if proceed {
            let mut state = take_request_state(&mut instance)?;
            let downstream_req = build_downstream_request(&mut state)?;
            let result = next.call(downstream_req).await;
            state.begin_response_phase();

            let mut is_error = false;
            match result {
                Ok(response) => {
                    let (rparts, rbody) = response.into_parts();
                    state.response_status = rparts.status;
                    state.response_version = Some(rparts.version);
                    state.response_headers = rparts.headers;
                    state.response_extensions = rparts.extensions;
                    if state.features().contains(Features::BUFFER_RESPONSE) {
                        match ResponseBuffer::capture(rbody).await {
                            Ok(buffer) => state.response_buffer = buffer,
                            Err(err) => {
                                tracing::warn!(error = %err, "downstream body read failed");
                                downstream_error(&mut state);
                                is_error = true;
                            }
                        }
                    } else {
                        state.response_stream = Some(rbody);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "downstream handler failed");
                    downstream_error(&mut state);
                    is_error = true;
                }
            }

            instance.state_mut().request = Some(state);

            let (returned, call) = self
                .invoke(instance, move |guest| {
                    guest.call_handle_response(ctx, is_error)
                })
                .await?;
            instance = returned;

            if let Err(err) = call {
                self.retire(instance);
                return Err(err);
            }
        }

        let state = take_request_state(&mut instance)?;
        self.pool.checkin(instance);
        Ok(build_response(state))
    }

    /// Run one guest entry point on the blocking pool.
    ///
    /// The instance travels into the blocking task and back through a
    /// oneshot. If this future is dropped while the guest is running (the
    /// framework cancelled the request), the blocking side still owns the
    /// instance and disposes of it: healthy instances go back to the pool
    /// with their request scope cleared, trapped ones are replaced.
    async fn invoke<R>(
        &self,
        mut instance: GuestInstance,
        entry: impl FnOnce(&mut GuestInstance) -> Result<R, BridgeError> + Send + 'static,
    ) -> Result<(GuestInstance, Result<R, BridgeError>), BridgeError>
    where
        R: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        let factory = Arc::clone(&self.factory);
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::task::spawn_blocking(move || {
            let result = entry(&mut instance);
            if let Err((instance, _)) = tx.send((instance, result)) {
                tracing::debug!("request cancelled during guest invocation");
                dispose(&pool, &factory, instance);
            }
        });

        rx.await.map_err(|_| {
            // The blocking task panicked before sending; the instance died
            // with it.
            self.factory.replace_into(&self.pool);
            BridgeError::GuestTrap("guest invocation panicked".into())
        })
    }

    /// Drop a trapped instance and refill its pool slot.
    fn retire(&self, instance: GuestInstance) {
        debug_assert!(instance.is_trapped());
        drop(instance);
        self.factory.replace_into(&self.pool);
    }
}

/// Return an orphaned instance to service after its request went away.
fn dispose(pool: &InstancePool, factory: &GuestFactory, mut instance: GuestInstance) {
    if instance.is_trapped() {
        drop(instance);
        factory.replace_into(pool);
    } else {
        instance.state_mut().request = None;
        pool.checkin(instance);
    }
}

fn take_request_state(instance: &mut GuestInstance) -> Result<RequestState, BridgeError> {
    instance
        .state_mut()
        .request
        .take()
        .ok_or_else(|| BridgeError::Wasmtime(anyhow::anyhow!("request scope lost")))
}

/// Reset the response side of the state after a downstream failure. The
/// guest still runs `handle_response` with `is_error = 1` and may populate
/// a response of its own; the status defaults to 500.
fn downstream_error(state: &mut RequestState) {
    state.response_status = StatusCode::INTERNAL_SERVER_ERROR;
    state.response_version = None;
    state.response_headers.clear();
    state.response_buffer = ResponseBuffer::new();
    state.response_stream = None;
}

/// Rebuild the (possibly guest-rewritten) request for the next handler.
fn build_downstream_request(state: &mut RequestState) -> Result<Request<Body>, BridgeError> {
    let uri: Uri = if state.uri.is_empty() {
        Uri::from_static("/")
    } else {
        state
            .uri
            .parse()
            .map_err(|e| BridgeError::GuestTrap(format!("guest-set uri rejected: {e}")))?
    };

    // A guest-written replacement wins over the pre-read body; with
    // neither, the original stream passes through untouched.
    let sized = match state.request_body_out.take() {
        Some(replacement) => Some(replacement.freeze()),
        None if state.request_body_buffered => Some(state.request_body.clone()),
        None => None,
    };
    let body = match sized {
        Some(bytes) => {
            // A materialized body is sent sized, whatever the original
            // framing.
            state
                .request_headers
                .insert(CONTENT_LENGTH, HeaderValue::from(bytes.len() as u64));
            state.request_headers.remove(TRANSFER_ENCODING);
            Body::from(bytes)
        }
        None => state
            .request_stream
            .take()
            .ok_or_else(|| BridgeError::Wasmtime(anyhow::anyhow!("request body already consumed")))?,
    };

    let mut request = Request::new(body);
    *request.method_mut() = state.method.clone();
    *request.uri_mut() = uri;
    *request.version_mut() = state.version;
    *request.headers_mut() = state.request_headers.clone();
    *request.extensions_mut() = std::mem::take(&mut state.request_extensions);
    Ok(request)
}

/// Assemble the final response: status, headers, then body bytes, then
/// trailers, then end.
fn build_response(mut state: RequestState) -> Response<BridgeBody> {
    let body = match state.response_stream.take() {
        // Pass-through: the downstream body was never materialized.
        Some(stream) => stream,
        // Guest-populated or captured payload: a guest rewrite wins over
        // the capture, and framing headers are re-derived from the
        // released bytes.
        None => {
            if let Some(replacement) = state.response_body_out.take() {
                state.response_buffer.body = replacement;
            }
            let buffer = std::mem::take(&mut state.response_buffer);
            state.response_headers.remove(TRANSFER_ENCODING);
            if buffer.trailers.is_empty() {
                state
                    .response_headers
                    .insert(CONTENT_LENGTH, HeaderValue::from(buffer.body.len() as u64));
            } else {
                state.response_headers.remove(CONTENT_LENGTH);
            }
            buffer.release()
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = state.response_status;
    if let Some(version) = state.response_version {
        *response.version_mut() = version;
    }
    *response.headers_mut() = state.response_headers;
    *response.extensions_mut() = state.response_extensions;
    response
}

fn internal_error() -> Response<BridgeBody> {
    let mut response = Response::new(BridgeBody::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
