//! Response capture and release.
//!
//! When `BUFFER_RESPONSE` is negotiated, the downstream response is drained
//! into a `ResponseBuffer` before `handle_response` runs, so the guest
//! observes a fully-materialized response and can rewrite it. While the
//! buffer is attached nothing reaches the wire; release happens by handing
//! the final `BridgeBody` back to the server, which yields body bytes, then
//! trailers, then end-of-stream — in that order.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use hyper::body::{Body, HttpBody, SizeHint};
use hyper::HeaderMap;

/// Fully drain a body: data frames first, then trailers.
pub async fn drain_body<B>(mut body: B) -> Result<(BytesMut, HeaderMap), B::Error>
where
    B: HttpBody<Data = Bytes> + Unpin,
{
    let mut data = BytesMut::new();
    while let Some(chunk) = body.data().await {
        data.extend_from_slice(&chunk?);
    }
    let trailers = body.trailers().await?.unwrap_or_default();
    Ok((data, trailers))
}

/// Captured downstream response payload: contiguous body bytes plus
/// trailers.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    pub body: BytesMut,
    pub trailers: HeaderMap,
}

impl ResponseBuffer {
    pub fn new() -> ResponseBuffer {
        ResponseBuffer::default()
    }

    /// Drain a downstream body into a buffer.
    pub async fn capture<B>(body: B) -> Result<ResponseBuffer, B::Error>
    where
        B: HttpBody<Data = Bytes> + Unpin,
    {
        let (data, trailers) = drain_body(body).await?;
        Ok(ResponseBuffer {
            body: data,
            trailers,
        })
    }

    /// Convert into the releasable body.
    pub fn release(self) -> BridgeBody {
        BridgeBody::buffered(self.body.freeze(), self.trailers)
    }
}

/// Body type returned by the middleware.
///
/// Either a fully-buffered payload (guest-visible path) or the untouched
/// downstream stream (pass-through path when response buffering is off).
pub enum BridgeBody {
    Buffered {
        data: Option<Bytes>,
        trailers: Option<HeaderMap>,
    },
    Stream(Body),
}

impl BridgeBody {
    pub fn empty() -> BridgeBody {
        BridgeBody::buffered(Bytes::new(), HeaderMap::new())
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> BridgeBody {
        BridgeBody::buffered(data.into(), HeaderMap::new())
    }

    pub fn buffered(data: Bytes, trailers: HeaderMap) -> BridgeBody {
        BridgeBody::Buffered {
            data: if data.is_empty() { None } else { Some(data) },
            trailers: if trailers.is_empty() {
                None
            } else {
                Some(trailers)
            },
        }
    }

    pub fn stream(body: Body) -> BridgeBody {
        BridgeBody::Stream(body)
    }
}

impl HttpBody for BridgeBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, hyper::Error>>> {
        match self.get_mut() {
            BridgeBody::Buffered { data, .. } => Poll::Ready(data.take().map(Ok)),
            BridgeBody::Stream(body) => Pin::new(body).poll_data(cx),
        }
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, hyper::Error>> {
        match self.get_mut() {
            BridgeBody::Buffered { trailers, .. } => Poll::Ready(Ok(trailers.take())),
            BridgeBody::Stream(body) => Pin::new(body).poll_trailers(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            BridgeBody::Buffered { data, trailers } => data.is_none() && trailers.is_none(),
            BridgeBody::Stream(body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            BridgeBody::Buffered { data, .. } => {
                SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64))
            }
            BridgeBody::Stream(body) => body.size_hint(),
        }
    }
}
