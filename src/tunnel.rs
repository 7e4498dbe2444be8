//! Proxy connection establishment (`spec.md` §4.7).
//!
//! Three connection kinds, selected by whether `config.proxy` is set and
//! whether the target scheme is `https`: `direct` (no proxy), `proxy`
//! (plain HTTP, absolute-form request path, no tunneling) and `tunnel`
//! (`CONNECT` over the proxy, then a TLS handshake to the target run over
//! the same bytes). Tunneling reuses the H1 engine for exactly one
//! request/response cycle, the same way the Transport is handed off to a
//! protocol engine everywhere else in this crate.

use http::{HeaderMap, Method};

use crate::config::HttpClientConfig;
use crate::engine::H1Engine;
use crate::error::Error;
use crate::message::Message;
use crate::transport::Transport;

/// The transport to hand to the Protocol Facade, plus a request path
/// override for plain-proxy mode (`None` for `direct`/`tunnel`, where the
/// origin-form path the caller already built is correct as-is).
pub(crate) struct Connected {
    pub(crate) transport: Transport,
    pub(crate) path_override: Option<String>,
}

/// Establish a connection to `(host, port, scheme)`, routing through
/// `config.proxy` when set.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    scheme: &str,
    path: &str,
    config: &HttpClientConfig,
) -> Result<Connected, Error> {
    let Some(proxy_uri) = &config.proxy else {
        let transport = Transport::connect(host, port, scheme, config).await?;
        return Ok(Connected {
            transport,
            path_override: None,
        });
    };

    let (proxy_host, proxy_port) = proxy_authority(proxy_uri)?;

    if scheme == "https" {
        let transport = tunnel(&proxy_host, proxy_port, host, port, config).await?;
        Ok(Connected {
            transport,
            path_override: None,
        })
    } else {
        let transport = Transport::connect(&proxy_host, proxy_port, "http", config).await?;
        let absolute = format!("{scheme}://{host}:{port}{path}");
        Ok(Connected {
            transport,
            path_override: Some(absolute),
        })
    }
}

/// Open a plain connection to the proxy, issue `CONNECT target:port`, and
/// on success re-handshake TLS to `target_host` over the same bytes.
async fn tunnel(
    proxy_host: &str,
    proxy_port: u16,
    target_host: &str,
    target_port: u16,
    config: &HttpClientConfig,
) -> Result<Transport, Error> {
    let proxy_transport = Transport::connect(proxy_host, proxy_port, "http", config).await?;
    let mut engine = H1Engine::new(proxy_transport, config);

    let authority = format!("{target_host}:{target_port}");
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::HOST,
        http::HeaderValue::from_str(&authority).map_err(|e| Error::protocol(e))?,
    );

    engine
        .send(Message::Request {
            host: authority.clone(),
            scheme: "http".to_owned(),
            path: authority,
            method: Method::CONNECT,
            headers,
            body: None,
            more_body: false,
        })
        .await?;

    let status = match engine.receive().await? {
        Message::Response { status, .. } => status,
        other => return Err(Error::protocol(format!("unexpected message during CONNECT: {other:?}"))),
    };

    if !(200..300).contains(&status) {
        return Err(Error::proxy(status));
    }

    let (transport, leftover) = engine.into_transport();
    if !leftover.is_empty() {
        return Err(Error::protocol("proxy sent data past the CONNECT response"));
    }

    #[cfg(feature = "rustls")]
    {
        transport.upgrade_tls(target_host, config).await
    }
    #[cfg(not(feature = "rustls"))]
    {
        let _ = (transport, config);
        Err(Error::connect(crate::error::ConnectKind::TlsHandshake)
            .with(std::io::Error::new(std::io::ErrorKind::Unsupported, "tls support disabled")))
    }
}

fn proxy_authority(uri: &http::Uri) -> Result<(String, u16), Error> {
    let host = uri
        .host()
        .ok_or_else(|| Error::protocol("proxy URL has no host"))?
        .to_owned();
    let default_port = if uri.scheme_str() == Some("https") { 443 } else { 80 };
    let port = uri.port_u16().unwrap_or(default_port);
    Ok((host, port))
}
