//! HTTP/1.1 response builder.
//!
//! A [`Response`] carries either a fully buffered body, serialized with a
//! `Content-Length`, or a [`BodyStream`] that the server writes with
//! `Transfer-Encoding: chunked` as chunks become available. The streamed form
//! is what lets the chat proxy forward model output while it is generated.

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;

use super::{Headers, StatusCode};

/// A boxed stream of body chunks. An `Err` item aborts the response.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Response payload.
pub enum Body {
    Full(Vec<u8>),
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use relaychat::http::{Response, StatusCode};
///
/// let response = Response::json(StatusCode::BadRequest, serde_json::json!({ "error": "nope" }));
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
/// assert!(text.contains("Content-Type: application/json\r\n"));
/// assert!(text.ends_with(r#"{"error":"nope"}"#));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Full(Vec::new()),
            keep_alive: true,
        }
    }

    /// Creates a JSON response from a `serde_json::Value`.
    pub fn json(status: StatusCode, value: serde_json::Value) -> Self {
        Self::new(status)
            .header("Content-Type", "application/json")
            .body(value.to_string())
    }

    /// Shorthand for the `{"error": message}` bodies every endpoint uses.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::json(status, serde_json::json!({ "error": message.into() }))
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a text body. `Content-Length` is written at serialization time.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::Full(body.into().into_bytes());
        self
    }

    /// Sets a streamed body; the response will be sent chunked.
    #[must_use]
    pub fn stream(mut self, stream: BodyStream) -> Self {
        self.body = Body::Stream(stream);
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the buffered body, or `None` for streamed responses.
    pub fn full_body(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Full(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    /// Splits the response into its serialized head and, for streamed
    /// responses, the body stream still to be written.
    ///
    /// For buffered bodies the returned bytes hold the complete message.
    /// Automatically adds `Content-Type: text/plain; charset=utf-8` to a
    /// non-empty buffered body without one, the framing header
    /// (`Content-Length` or `Transfer-Encoding`) and `Connection`.
    pub fn into_parts(mut self) -> (BytesMut, Option<BodyStream>) {
        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.insert("Connection", connection);

        let (framing, payload, stream) = match self.body {
            Body::Full(bytes) => {
                if !bytes.is_empty() && !self.headers.contains("content-type") {
                    self.headers
                        .insert("Content-Type", "text/plain; charset=utf-8");
                }
                (format!("Content-Length: {}\r\n", bytes.len()), bytes, None)
            }
            Body::Stream(stream) => (
                "Transfer-Encoding: chunked\r\n".to_owned(),
                Vec::new(),
                Some(stream),
            ),
        };

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + payload.len());
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(framing.as_bytes());
        buf.put(&b"\r\n"[..]);
        buf.put(payload.as_slice());

        (buf, stream)
    }

    /// Serializes a buffered response. For streamed responses only the head
    /// is returned; use [`into_parts`](Self::into_parts) to obtain the body.
    pub fn into_bytes(self) -> BytesMut {
        self.into_parts().0
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

/// Frames one body chunk for `Transfer-Encoding: chunked`.
pub fn encode_chunk(chunk: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(chunk.len() + 16);
    buf.put(format!("{:X}\r\n", chunk.len()).as_bytes());
    buf.put(chunk);
    buf.put(&b"\r\n"[..]);
    buf
}

/// The zero-length chunk that terminates a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";
