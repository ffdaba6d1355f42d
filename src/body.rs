//! Streaming request/response bodies.
//!
//! Requests and responses in `osrv` carry a lazy byte stream instead of a
//! fully-buffered payload, the way `hyper`'s own `body` module separates the
//! wire-level `Body`/`Payload` machinery from the rest of the crate. A `Body`
//! here is consumable exactly once: taking its stream (via
//! [`Body::into_stream`] or [`crate::body::to_bytes`]) leaves nothing behind
//! for a second read, which is what lets [`Request`](crate::request::Request)
//! enforce its "body used at most once" invariant at the type level.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::Error;

type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send + 'static>>;

/// A lazy, at-most-once-consumable sequence of body bytes.
pub struct Body {
    inner: Inner,
}

enum Inner {
    Empty,
    Full(Bytes),
    Streaming(BoxStream),
}

impl Body {
    /// A body with no content.
    pub fn empty() -> Self {
        Body {
            inner: Inner::Empty,
        }
    }

    /// A body made of a single, already-available buffer.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Body {
            inner: Inner::Full(bytes.into()),
        }
    }

    /// A body made of a UTF-8 string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Body::from_bytes(s.into().into_bytes())
    }

    /// A body backed by an arbitrary chunk stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, Error>> + Send + 'static,
    {
        Body {
            inner: Inner::Streaming(Box::pin(stream)),
        }
    }

    /// Wraps this body so that it fails with
    /// [`Error::request_limit_exceeded`] as soon as the cumulative byte count
    /// across all chunks would exceed `max_bytes`. The failing chunk is the
    /// last one yielded; nothing further is pulled from the inner stream
    /// afterwards.
    pub fn limited(self, max_bytes: u64) -> Self {
        let stream = self.into_stream();
        Body::from_stream(LimitedStream {
            inner: stream,
            max_bytes,
            seen_bytes: 0,
            failed: false,
        })
    }

    /// Whether this body is statically known to be empty.
    pub fn is_empty(&self) -> bool {
        matches!(&self.inner, Inner::Empty)
            || matches!(&self.inner, Inner::Full(b) if b.is_empty())
    }

    /// Converts into a stream of chunks. This is the only way to read a
    /// `Body`'s bytes, and consumes it.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>> {
        match self.inner {
            Inner::Empty => Box::pin(futures_util::stream::empty()),
            Inner::Full(bytes) => Box::pin(futures_util::stream::once(async move { Ok(bytes) })),
            Inner::Streaming(s) => s,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Empty => f.write_str("Body(empty)"),
            Inner::Full(b) => write!(f, "Body(full, {} bytes)", b.len()),
            Inner::Streaming(_) => f.write_str("Body(streaming)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from_bytes(bytes)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::from_string(s)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::from_string(s)
    }
}

pin_project_lite::pin_project! {
    struct LimitedStream<S> {
        #[pin]
        inner: S,
        max_bytes: u64,
        seen_bytes: u64,
        failed: bool,
    }
}

impl<S> Stream for LimitedStream<S>
where
    S: Stream<Item = Result<Bytes, Error>>,
{
    type Item = Result<Bytes, Error>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.failed {
            return std::task::Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(chunk))) => {
                *this.seen_bytes += chunk.len() as u64;
                if *this.seen_bytes > *this.max_bytes {
                    *this.failed = true;
                    std::task::Poll::Ready(Some(Err(Error::request_limit_exceeded(
                        *this.max_bytes,
                        *this.seen_bytes,
                    ))))
                } else {
                    std::task::Poll::Ready(Some(Ok(chunk)))
                }
            }
            other => other,
        }
    }
}

/// Buffers an entire [`Body`] into a single [`Bytes`] value.
///
/// Fails with whatever error the underlying stream produced, including
/// [`Error::request_limit_exceeded`] for a body that was wrapped with
/// [`Body::limited`].
pub async fn to_bytes(body: Body) -> Result<Bytes, Error> {
    let mut stream = body.into_stream();
    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_body_round_trips() {
        let body = Body::from_string("hello");
        let bytes = to_bytes(body).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn limited_body_passes_under_the_limit() {
        let body = Body::from_string("1234").limited(4);
        let bytes = to_bytes(body).await.unwrap();
        assert_eq!(&bytes[..], b"1234");
    }

    #[tokio::test]
    async fn limited_body_fails_over_the_limit() {
        let body = Body::from_string("1234567890").limited(4);
        let err = to_bytes(body).await.unwrap_err();
        assert!(err.is_request_limit_exceeded());
        match err {
            Error::RequestLimitExceeded {
                max_bytes,
                actual_bytes,
            } => {
                assert_eq!(max_bytes, 4);
                assert_eq!(actual_bytes, 10);
            }
            _ => panic!("wrong error kind"),
        }
    }

    #[tokio::test]
    async fn limited_body_accumulates_across_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"12")),
            Ok(Bytes::from_static(b"34")),
            Ok(Bytes::from_static(b"56")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks)).limited(4);
        let err = to_bytes(body).await.unwrap_err();
        assert!(err.is_request_limit_exceeded());
    }
}
