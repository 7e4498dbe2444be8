//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

/// Options recognized by [`HttpClient`](crate::HttpClient) and
/// [`HttpSession`](crate::HttpSession).
///
/// Mirrors the option set of the original `HttpClientConfig` (see
/// `original_source/bareclient/config.py`), plus `read_timeout` /
/// `write_timeout`, which the spec names as a per-phase caller
/// responsibility (`spec.md` §5) without placing them in the options
/// table.
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Inbound read buffer size for H1 framing.
    pub h11_bufsiz: usize,
    /// PEM file of trusted CA certificates, used if `ssl_context` is unset.
    pub cafile: Option<String>,
    /// Directory of trusted CA certificates (hashed, OpenSSL `c_rehash`
    /// style), used if `ssl_context` is unset.
    pub capath: Option<String>,
    /// PEM-encoded trusted CA certificate data, used if `ssl_context` is
    /// unset.
    pub cadata: Option<String>,
    /// A pre-built TLS client config. Wins over `cafile`/`capath`/`cadata`.
    #[cfg(feature = "rustls")]
    pub ssl_context: Option<Arc<tokio_rustls::rustls::ClientConfig>>,
    /// Advertised ALPN protocol list, most preferred first.
    pub alpn_protocols: Vec<AlpnProtocol>,
    /// TLS cipher suite names to offer, in preference order. Empty means
    /// the hardened default cipher suite list of the TLS backend.
    pub ciphers: Vec<String>,
    /// TLS protocol options (`TlsOption` bit set). Defaults to a hardened
    /// set that disables legacy protocol versions and TLS compression.
    pub options: TlsOptions,
    /// Seconds to wait for transport establishment (TCP connect + TLS
    /// handshake).
    pub connect_timeout: Option<Duration>,
    /// Per-read timeout once connected.
    pub read_timeout: Option<Duration>,
    /// Per-write timeout once connected.
    pub write_timeout: Option<Duration>,
    /// Upstream proxy URL. Engages proxy/tunnel mode.
    pub proxy: Option<http::Uri>,
}

/// An ALPN protocol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnProtocol {
    Http2,
    Http11,
}

impl AlpnProtocol {
    pub(crate) fn wire_id(self) -> &'static [u8] {
        match self {
            AlpnProtocol::Http2 => b"h2",
            AlpnProtocol::Http11 => b"http/1.1",
        }
    }

    pub(crate) fn from_wire_id(id: &[u8]) -> Option<Self> {
        match id {
            b"h2" => Some(AlpnProtocol::Http2),
            b"http/1.1" => Some(AlpnProtocol::Http11),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// TLS protocol option bits. The default disables SSLv2/v3, TLS 1.0/1.1
    /// and TLS-level compression, matching the spec's "sensible hardened
    /// default".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TlsOptions: u32 {
        const NO_SSLV2 = 0b0000_0001;
        const NO_SSLV3 = 0b0000_0010;
        const NO_TLSV1 = 0b0000_0100;
        const NO_TLSV1_1 = 0b0000_1000;
        const NO_COMPRESSION = 0b0001_0000;
    }
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self::NO_SSLV2 | Self::NO_SSLV3 | Self::NO_TLSV1 | Self::NO_TLSV1_1 | Self::NO_COMPRESSION
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            h11_bufsiz: 8192,
            cafile: None,
            capath: None,
            cadata: None,
            #[cfg(feature = "rustls")]
            ssl_context: None,
            alpn_protocols: vec![AlpnProtocol::Http2, AlpnProtocol::Http11],
            ciphers: Vec::new(),
            options: TlsOptions::default(),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            proxy: None,
        }
    }
}

impl HttpClientConfig {
    /// A config with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
