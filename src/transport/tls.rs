//! TLS client-config construction and handshake + ALPN query.
//!
//! TLS context construction is named out of scope by `spec.md` §1 ("TLS
//! context construction, cipher/ALPN configuration, certificate loading
//! (consumed as an opaque pre-built TLS config)"). This module is the thin
//! ambient layer that builds that opaque config when the caller does not
//! supply one directly via [`HttpClientConfig::ssl_context`], the same
//! role `rama-tls-rustls` plays for the rest of the `rama` stack.

use std::io::BufReader;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::config::{AlpnProtocol, HttpClientConfig};
use crate::error::{ConnectKind, Error};

/// rustls 0.23 needs a process-wide `CryptoProvider` installed before any
/// `ClientConfig`/`ServerConfig` builder runs; `install_default` is
/// idempotent and safe to call from every connection.
fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();
    });
}

pub(crate) async fn handshake(
    tcp: TcpStream,
    host: &str,
    config: &HttpClientConfig,
) -> Result<(tokio_rustls::client::TlsStream<TcpStream>, AlpnProtocol), Error> {
    ensure_crypto_provider();
    let client_config = client_config(config)?;
    let connector = TlsConnector::from(client_config);
    let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(host.to_owned())
        .map_err(|e| Error::connect(ConnectKind::TlsHandshake).with(e))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::connect(ConnectKind::TlsHandshake).with(e))?;

    let alpn = stream
        .get_ref()
        .1
        .alpn_protocol()
        .and_then(AlpnProtocol::from_wire_id)
        .unwrap_or(AlpnProtocol::Http11);

    Ok((stream, alpn))
}

/// `config.options` and `config.ciphers` are not threaded into the rustls
/// builder below: rustls never implements SSLv2/v3/TLS 1.0/1.1 or TLS-level
/// compression in the first place, so every `TlsOptions` bit already holds
/// unconditionally, and cipher-suite selection by name has no string-based
/// lookup in this backend (see DESIGN.md).
fn client_config(config: &HttpClientConfig) -> Result<Arc<ClientConfig>, Error> {
    if let Some(ssl_context) = &config.ssl_context {
        return Ok(ssl_context.clone());
    }

    let mut roots = RootCertStore::empty();

    if let Some(cafile) = &config.cafile {
        add_pem_file(&mut roots, cafile)?;
    }
    if let Some(cadata) = &config.cadata {
        add_pem_bytes(&mut roots, cadata.as_bytes())?;
    }
    if config.cafile.is_none() && config.cadata.is_none() && config.capath.is_none() {
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            let _ = roots.add(cert);
        }
    }
    if let Some(capath) = &config.capath {
        for entry in std::fs::read_dir(capath).map_err(Error::io)? {
            let entry = entry.map_err(Error::io)?;
            if entry.path().extension().is_some_and(|e| e == "pem") {
                add_pem_file(&mut roots, &entry.path().to_string_lossy())?;
            }
        }
    }

    let mut client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    client_config.alpn_protocols = config
        .alpn_protocols
        .iter()
        .map(|p| p.wire_id().to_vec())
        .collect();

    Ok(Arc::new(client_config))
}

fn add_pem_file(roots: &mut RootCertStore, path: &str) -> Result<(), Error> {
    let bytes = std::fs::read(path).map_err(Error::io)?;
    add_pem_bytes(roots, &bytes)
}

fn add_pem_bytes(roots: &mut RootCertStore, bytes: &[u8]) -> Result<(), Error> {
    let mut reader = BufReader::new(bytes);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(Error::io)?;
        roots
            .add(cert)
            .map_err(|e| Error::connect(ConnectKind::TlsHandshake).with(e))?;
    }
    Ok(())
}
