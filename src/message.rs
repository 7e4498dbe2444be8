//! The engine ↔ requester message protocol.
//!
//! Replaces the source's string-`type`-tagged dicts (`"http.request"`,
//! `"http.response.body"`, ...) with a proper tagged sum, per the
//! re-architecture note in `spec.md` §9. Pseudo-headers never appear here;
//! they are synthesized and stripped entirely inside the H2 engine.

use http::{HeaderMap, Method};

use crate::body::Body;

/// The negotiated wire protocol for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    H11,
    H2,
}

/// A stream identifier, meaningful only for H2 connections.
pub type StreamId = Option<u32>;

/// One message exchanged between the [`Requester`](crate::requester::Requester)
/// and a protocol engine (H1 or H2), in either direction.
pub enum Message {
    /// Request-initiating. Carries the first body chunk, if any.
    Request {
        host: String,
        scheme: String,
        path: String,
        method: Method,
        headers: HeaderMap,
        body: Option<bytes::Bytes>,
        more_body: bool,
    },
    /// A subsequent request body chunk.
    RequestBody {
        body: bytes::Bytes,
        more_body: bool,
        stream_id: StreamId,
    },
    /// User-initiated close of a stream (H2) or the connection (H1).
    Disconnect { stream_id: StreamId },
    /// Acknowledges that the request was accepted and is in flight.
    ResponseConnection {
        http_version: HttpVersion,
        stream_id: StreamId,
    },
    /// The response head.
    Response {
        status: u16,
        headers: HeaderMap,
        more_body: bool,
        stream_id: StreamId,
        http_version: HttpVersion,
    },
    /// A response payload chunk.
    ResponseBody {
        body: bytes::Bytes,
        more_body: bool,
        stream_id: StreamId,
    },
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Request {
                method, path, more_body, ..
            } => f
                .debug_struct("Request")
                .field("method", method)
                .field("path", path)
                .field("more_body", more_body)
                .finish(),
            Message::RequestBody {
                more_body,
                stream_id,
                ..
            } => f
                .debug_struct("RequestBody")
                .field("more_body", more_body)
                .field("stream_id", stream_id)
                .finish(),
            Message::Disconnect { stream_id } => {
                f.debug_struct("Disconnect").field("stream_id", stream_id).finish()
            }
            Message::ResponseConnection {
                http_version,
                stream_id,
            } => f
                .debug_struct("ResponseConnection")
                .field("http_version", http_version)
                .field("stream_id", stream_id)
                .finish(),
            Message::Response {
                status,
                more_body,
                stream_id,
                http_version,
                ..
            } => f
                .debug_struct("Response")
                .field("status", status)
                .field("more_body", more_body)
                .field("stream_id", stream_id)
                .field("http_version", http_version)
                .finish(),
            Message::ResponseBody {
                more_body,
                stream_id,
                ..
            } => f
                .debug_struct("ResponseBody")
                .field("more_body", more_body)
                .field("stream_id", stream_id)
                .finish(),
        }
    }
}

/// Public request value handed to [`HttpClient`](crate::HttpClient) /
/// [`HttpSession::request`](crate::HttpSession::request).
pub struct Request {
    pub host: String,
    pub scheme: String,
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl Request {
    /// Build a request with no body.
    #[must_use]
    pub fn new(host: impl Into<String>, scheme: impl Into<String>, path: impl Into<String>, method: Method) -> Self {
        Self {
            host: host.into(),
            scheme: scheme.into(),
            path: path.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// Public response value produced once per request.
pub struct Response {
    /// The originating request URL, for error reporting.
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl Response {
    /// True if `status` is in `[200, 300)`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into one contiguous buffer. Returns an empty buffer
    /// if there is no body.
    pub async fn raw(self) -> Result<bytes::Bytes, crate::error::Error> {
        match self.body {
            Some(body) => body.into_bytes().await,
            None => Ok(bytes::Bytes::new()),
        }
    }

    /// Drain the body and decode it as text, using the `charset` parameter
    /// of the response's `content-type` header if present, else UTF-8.
    pub async fn text(self) -> Result<String, crate::error::Error> {
        let encoding = self
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| content_type_charset(ct))
            .unwrap_or_else(|| "utf-8".to_owned());
        match self.body {
            Some(body) => body.into_text(&encoding).await,
            None => Ok(String::new()),
        }
    }

    /// Drain the body and decode it as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, crate::error::Error> {
        match self.body {
            Some(body) => body.into_json().await,
            None => serde_json::from_slice(b"null").map_err(|e| crate::error::Error::protocol(e)),
        }
    }

    /// Raise [`HttpStatusError`](crate::error::Error) if `status` is not in
    /// `[200, 300)`. Never raised implicitly elsewhere.
    pub async fn raise_for_status(self) -> Result<Self, crate::error::Error> {
        if self.is_success() {
            return Ok(self);
        }
        let url = self.url.clone();
        let status = self.status;
        let headers = self.headers.clone();
        let snapshot = match self.body {
            Some(mut body) => {
                const SNAPSHOT_CAP: usize = 16 * 1024;
                let mut buf = Vec::new();
                while buf.len() < SNAPSHOT_CAP {
                    match body.next().await {
                        Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                        Some(Err(_)) | None => break,
                    }
                }
                buf.truncate(SNAPSHOT_CAP);
                bytes::Bytes::from(buf)
            }
            None => bytes::Bytes::new(),
        };
        Err(crate::error::Error::status(url, status, headers, snapshot))
    }
}

fn content_type_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .find_map(|param| {
            let param = param.trim();
            param
                .strip_prefix("charset=")
                .map(|v| v.trim_matches('"').to_owned())
        })
}
