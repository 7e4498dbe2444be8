//! Error and Result types for the protocol engine.

use std::error::Error as StdError;
use std::fmt;

/// A boxed, type-erased cause.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for `bareclient`.
///
/// The `Display` impl only describes this error's own kind; use
/// `std::error::Error::source` (or a reporter that walks the source chain)
/// to see the full cause chain. The exact wording is not part of the public
/// contract and may change between releases.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<BoxError>,
}

#[derive(Debug)]
enum Kind {
    Connect(ConnectKind),
    Protocol,
    ServerDisconnected,
    ReadTimeout,
    WriteTimeout,
    Proxy(u16),
    Status {
        url: String,
        status: u16,
        headers: http::HeaderMap,
        body: bytes::Bytes,
    },
    Io,
    Closed,
}

/// Sub-kinds of [`ConnectError`](Error::is_connect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectKind {
    Timeout,
    Refused,
    UnresolvedHost,
    TlsHandshake,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: Kind) -> Self {
        Self {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    #[inline]
    pub(crate) fn with<C: Into<BoxError>>(mut self, cause: C) -> Self {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn connect(kind: ConnectKind) -> Self {
        Self::new(Kind::Connect(kind))
    }

    pub(crate) fn protocol(msg: impl Into<BoxError>) -> Self {
        Self::new(Kind::Protocol).with(msg)
    }

    pub(crate) fn server_disconnected() -> Self {
        Self::new(Kind::ServerDisconnected)
    }

    pub(crate) fn read_timeout() -> Self {
        Self::new(Kind::ReadTimeout)
    }

    pub(crate) fn write_timeout() -> Self {
        Self::new(Kind::WriteTimeout)
    }

    pub(crate) fn proxy(status: u16) -> Self {
        Self::new(Kind::Proxy(status))
    }

    pub(crate) fn status(
        url: String,
        status: u16,
        headers: http::HeaderMap,
        body: bytes::Bytes,
    ) -> Self {
        Self::new(Kind::Status {
            url,
            status,
            headers,
            body,
        })
    }

    pub(crate) fn io(cause: std::io::Error) -> Self {
        Self::new(Kind::Io).with(cause)
    }

    pub(crate) fn closed() -> Self {
        Self::new(Kind::Closed)
    }

    /// True if this is a [`ConnectError`](Self::is_connect) variant.
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect(_))
    }

    /// The [`ConnectKind`] sub-kind, if this is a connect error.
    #[must_use]
    pub fn connect_kind(&self) -> Option<ConnectKind> {
        match self.inner.kind {
            Kind::Connect(k) => Some(k),
            _ => None,
        }
    }

    /// True for a locally-detected framing or semantic wire violation.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol)
    }

    /// True when the peer closed the connection before a terminal response
    /// event was observed.
    #[must_use]
    pub fn is_server_disconnected(&self) -> bool {
        matches!(self.inner.kind, Kind::ServerDisconnected)
    }

    /// True for a read-phase timeout.
    #[must_use]
    pub fn is_read_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::ReadTimeout)
    }

    /// True for a write-phase timeout.
    #[must_use]
    pub fn is_write_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::WriteTimeout)
    }

    /// The proxy's refusal status code, if the CONNECT tunnel was refused.
    #[must_use]
    pub fn proxy_status(&self) -> Option<u16> {
        match self.inner.kind {
            Kind::Proxy(status) => Some(status),
            _ => None,
        }
    }

    /// The originating request URL, if this is a [`raise_for_status`]
    /// failure.
    ///
    /// [`raise_for_status`]: crate::Response::raise_for_status
    #[must_use]
    pub fn status_url(&self) -> Option<&str> {
        match &self.inner.kind {
            Kind::Status { url, .. } => Some(url),
            _ => None,
        }
    }

    /// The non-2xx status code, if this is a [`raise_for_status`] failure.
    ///
    /// [`raise_for_status`]: crate::Response::raise_for_status
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self.inner.kind {
            Kind::Status { status, .. } => Some(status),
            _ => None,
        }
    }

    /// The response headers, if this is a [`raise_for_status`] failure.
    ///
    /// [`raise_for_status`]: crate::Response::raise_for_status
    #[must_use]
    pub fn status_headers(&self) -> Option<&http::HeaderMap> {
        match &self.inner.kind {
            Kind::Status { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// A snapshot (capped at 16 KiB) of the response body, if this is a
    /// [`raise_for_status`] failure.
    ///
    /// [`raise_for_status`]: crate::Response::raise_for_status
    #[must_use]
    pub fn status_body(&self) -> Option<&bytes::Bytes> {
        match &self.inner.kind {
            Kind::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    /// True if a sender's channel is closed (peer dropped its half).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::Closed)
    }

    fn description(&self) -> String {
        match &self.inner.kind {
            Kind::Connect(ConnectKind::Timeout) => "timed out connecting to host".to_owned(),
            Kind::Connect(ConnectKind::Refused) => "connection refused".to_owned(),
            Kind::Connect(ConnectKind::UnresolvedHost) => "could not resolve host".to_owned(),
            Kind::Connect(ConnectKind::TlsHandshake) => "TLS handshake failed".to_owned(),
            Kind::Protocol => "protocol error".to_owned(),
            Kind::ServerDisconnected => "server disconnected before a response arrived".to_owned(),
            Kind::ReadTimeout => "timed out reading from connection".to_owned(),
            Kind::WriteTimeout => "timed out writing to connection".to_owned(),
            Kind::Proxy(status) => format!("proxy CONNECT refused with status {status}"),
            Kind::Status { url, status, .. } => {
                format!("request to {url} failed with status {status}")
            }
            Kind::Io => "connection I/O error".to_owned(),
            Kind::Closed => "channel closed".to_owned(),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("bareclient::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.cause.as_deref().map(|e| e as _)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io(e)
    }
}
