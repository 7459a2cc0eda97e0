//! Definition of the response body.
//!
//! Handlers produce exactly three body shapes: nothing (status-only
//! responses and HEAD), one pre-serialized buffer (lock discovery,
//! PROPPATCH, error text), or a stream of chunks produced while the
//! response is already underway (GET file contents, the PROPFIND walk).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream};
use http::header::HeaderMap;
use http_body::Body as HttpBody;

/// Body is returned by the webdav handler, and implements both `Stream`
/// and `http_body::Body` with `io::Error` as the error type throughout.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    // A single buffer, handed out on the first poll.
    Once(Bytes),
    Chunks(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body { kind: Kind::Empty }
    }

    /// Create a body from a stream of chunks.
    pub fn stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Body {
        Body {
            kind: Kind::Chunks(Box::pin(stream)),
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match &mut this.kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Once(_) => {
                let buf = match std::mem::replace(&mut this.kind, Kind::Empty) {
                    Kind::Once(buf) => buf,
                    _ => unreachable!(),
                };
                Poll::Ready(Some(Ok(buf)))
            }
            Kind::Chunks(stream) => stream.as_mut().poll_next(cx),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, Kind::Empty)
    }
}

impl From<Bytes> for Body {
    fn from(buf: Bytes) -> Body {
        Body {
            kind: Kind::Once(buf),
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Body {
        Bytes::from(text).into()
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Body {
        Bytes::copy_from_slice(text.as_bytes()).into()
    }
}
