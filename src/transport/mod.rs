//! TCP + optional TLS transport, with ALPN negotiation.
//!
//! Grounded on `old-src/tcp/client/mod.rs` for the connect shape and
//! `rama-tls-rustls` for the responsibility split between "open the
//! socket" and "what protocol did TLS negotiate" — the Transport itself
//! never interprets HTTP; it hands the negotiated ALPN protocol upward so
//! the caller can pick an engine.

#[cfg(feature = "rustls")]
pub mod tls;

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::config::{AlpnProtocol, HttpClientConfig};
use crate::error::{ConnectKind, Error};

/// An established connection, plain or TLS, plus the negotiated ALPN
/// protocol (defaulting to H1.1 framing if none was negotiated).
pub struct Transport {
    io: TransportIo,
    pub(crate) alpn: AlpnProtocol,
}

enum TransportIo {
    Plain(TcpStream),
    #[cfg(feature = "rustls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    /// Open a TCP connection to `(host, port)`, wrapping with TLS when
    /// `scheme == "https"`.
    #[tracing::instrument(skip(config), fields(host, port, scheme))]
    pub async fn connect(
        host: &str,
        port: u16,
        scheme: &str,
        config: &HttpClientConfig,
    ) -> Result<Self, Error> {
        let connect_fut = TcpStream::connect((host, port));
        let tcp = match config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect_fut)
                .await
                .map_err(|_| Error::connect(ConnectKind::Timeout))?
                .map_err(map_connect_io_err)?,
            None => connect_fut.await.map_err(map_connect_io_err)?,
        };
        tracing::debug!("tcp connected");

        if scheme == "https" {
            #[cfg(feature = "rustls")]
            {
                let (stream, alpn) = tls::handshake(tcp, host, config).await?;
                tracing::debug!(?alpn, "tls handshake complete");
                return Ok(Self {
                    io: TransportIo::Tls(Box::new(stream)),
                    alpn,
                });
            }
            #[cfg(not(feature = "rustls"))]
            {
                return Err(Error::connect(ConnectKind::TlsHandshake).with(
                    std::io::Error::new(std::io::ErrorKind::Unsupported, "tls support disabled"),
                ));
            }
        }

        Ok(Self {
            io: TransportIo::Plain(tcp),
            alpn: AlpnProtocol::Http11,
        })
    }

    /// Wrap an already-open plain stream as a transport. Used by the
    /// [`Tunnel`](crate::tunnel) to re-wrap a proxy connection with TLS.
    pub(crate) fn from_plain(tcp: TcpStream) -> Self {
        Self {
            io: TransportIo::Plain(tcp),
            alpn: AlpnProtocol::Http11,
        }
    }

    #[cfg(feature = "rustls")]
    pub(crate) async fn upgrade_tls(
        self,
        host: &str,
        config: &HttpClientConfig,
    ) -> Result<Self, Error> {
        let tcp = match self.io {
            TransportIo::Plain(tcp) => tcp,
            TransportIo::Tls(_) => return Err(Error::protocol("transport already TLS")),
        };
        let (stream, alpn) = tls::handshake(tcp, host, config).await?;
        Ok(Self {
            io: TransportIo::Tls(Box::new(stream)),
            alpn,
        })
    }

    pub(crate) async fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        use tokio::io::AsyncReadExt;
        let fut = self.read(buf);
        match timeout {
            Some(t) => tokio::time::timeout(t, fut)
                .await
                .map_err(|_| Error::read_timeout())?
                .map_err(Error::io),
            None => fut.await.map_err(Error::io),
        }
    }

    /// Best-effort shutdown; failures are not surfaced since a `Disconnect`
    /// is a one-way notification, not a request that can fail.
    pub(crate) async fn shutdown_best_effort(&mut self) -> Result<(), Error> {
        use tokio::io::AsyncWriteExt;
        let _ = self.shutdown().await;
        Ok(())
    }

    pub(crate) async fn write_all_timeout(
        &mut self,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        use tokio::io::AsyncWriteExt;
        let fut = self.write_all(buf);
        match timeout {
            Some(t) => tokio::time::timeout(t, fut)
                .await
                .map_err(|_| Error::write_timeout())?
                .map_err(Error::io),
            None => fut.await.map_err(Error::io),
        }
    }
}

fn map_connect_io_err(e: std::io::Error) -> Error {
    use std::io::ErrorKind;
    let kind = match e.kind() {
        ErrorKind::ConnectionRefused => ConnectKind::Refused,
        ErrorKind::NotFound | ErrorKind::AddrNotAvailable => ConnectKind::UnresolvedHost,
        _ => ConnectKind::Refused,
    };
    Error::connect(kind).with(e)
}

impl AsyncRead for Transport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.io {
            TransportIo::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "rustls")]
            TransportIo::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.io {
            TransportIo::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "rustls")]
            TransportIo::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.io {
            TransportIo::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "rustls")]
            TransportIo::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.io {
            TransportIo::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "rustls")]
            TransportIo::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
