//! Shared scaffolding for the end-to-end scenario tests: real loopback
//! TCP/TLS servers driven with raw bytes, so the client side exercises
//! nothing but `bareclient`'s public API.
//!
//! The protocol engines are crate-private, so these tests cannot mock
//! them directly; instead each test stands up a real listener on
//! `127.0.0.1` and speaks just enough HTTP/1.1 or HTTP/2 wire format by
//! hand to play the server role.

#![allow(dead_code)]

use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::{TlsAcceptor, server::TlsStream};

const TEST_CERT: &[u8] = include_bytes!("../fixtures/test_cert.pem");
const TEST_KEY: &[u8] = include_bytes!("../fixtures/test_key.pem");

fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();
    });
}

fn load_certs() -> Vec<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut BufReader::new(TEST_CERT))
        .collect::<Result<Vec<_>, _>>()
        .expect("valid cert fixture")
}

fn load_key() -> PrivateKeyDer<'static> {
    rustls_pemfile::private_key(&mut BufReader::new(TEST_KEY))
        .expect("valid key fixture")
        .expect("fixture contains a private key")
}

/// Bind a loopback TCP listener on an ephemeral port.
pub async fn bind_loopback() -> (SocketAddr, TcpListener) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    (addr, listener)
}

/// A `TlsAcceptor` bound to the test fixture cert (`CN=localhost`),
/// advertising `alpn` (most preferred first) to the ALPN negotiation.
pub fn tls_acceptor(alpn: &[&[u8]]) -> TlsAcceptor {
    ensure_crypto_provider();
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(load_certs(), load_key())
        .expect("valid cert/key pair");
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    TlsAcceptor::from(Arc::new(config))
}

pub async fn accept_tls(listener: &TcpListener, acceptor: &TlsAcceptor) -> TlsStream<TcpStream> {
    let (tcp, _) = listener.accept().await.expect("accept tcp");
    acceptor.accept(tcp).await.expect("tls accept")
}

/// Read one CRLF-terminated line, stripping the trailing `\r\n`.
pub async fn read_line<S: AsyncRead + Unpin>(io: &mut S) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        io.read_exact(&mut byte).await.expect("read line byte");
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            buf.push(byte[0]);
        }
    }
    String::from_utf8(buf).expect("utf8 line")
}

/// Read an HTTP/1.1 request head (request line + headers), stopping after
/// the blank line. Returned as raw text for callers to inspect.
pub async fn read_h1_request_head<S: AsyncRead + Unpin>(io: &mut S) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        io.read_exact(&mut byte).await.expect("read request head");
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(buf).expect("utf8 request head")
}

/// Read a `transfer-encoding: chunked` request body, returning the
/// reassembled payload. No trailers are expected.
pub async fn read_chunked_body<S: AsyncRead + Unpin>(io: &mut S) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let size_line = read_line(io).await;
        let size = usize::from_str_radix(size_line.trim(), 16).expect("chunk size line");
        if size == 0 {
            let trailer = read_line(io).await;
            assert!(trailer.is_empty(), "no trailers expected in these fixtures");
            break;
        }
        let mut chunk = vec![0u8; size];
        io.read_exact(&mut chunk).await.expect("read chunk data");
        body.extend_from_slice(&chunk);
        let rest_of_line = read_line(io).await;
        assert!(rest_of_line.is_empty(), "chunk data must be followed by bare CRLF");
    }
    body
}

pub async fn write_all<S: AsyncWrite + Unpin>(io: &mut S, bytes: &[u8]) {
    io.write_all(bytes).await.expect("write bytes");
    io.flush().await.expect("flush");
}

/// Hand-rolled HTTP/2 wire helpers: just enough framing to play the
/// server role against this crate's client-only H2 engine
/// (`src/engine/h2/frame.rs`, `src/engine/h2/hpack.rs`).
pub mod h2raw {
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
    pub const KIND_DATA: u8 = 0x0;
    pub const KIND_HEADERS: u8 = 0x1;
    pub const FLAG_END_STREAM: u8 = 0x1;
    pub const FLAG_END_HEADERS: u8 = 0x4;

    pub struct Frame {
        pub kind: u8,
        pub flags: u8,
        pub stream_id: u32,
        pub payload: Vec<u8>,
    }

    pub async fn read_preface<S: AsyncRead + Unpin>(io: &mut S) {
        let mut buf = [0u8; 24];
        io.read_exact(&mut buf).await.expect("read client preface");
        assert_eq!(&buf[..], PREFACE, "client sent a non-conforming h2 preface");
    }

    pub async fn read_frame<S: AsyncRead + Unpin>(io: &mut S) -> Frame {
        let mut header = [0u8; 9];
        io.read_exact(&mut header).await.expect("read frame header");
        let length = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let kind = header[3];
        let flags = header[4];
        let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7fff_ffff;
        let mut payload = vec![0u8; length];
        if length > 0 {
            io.read_exact(&mut payload).await.expect("read frame payload");
        }
        Frame {
            kind,
            flags,
            stream_id,
            payload,
        }
    }

    pub async fn write_frame<S: AsyncWrite + Unpin>(io: &mut S, kind: u8, flags: u8, stream_id: u32, payload: &[u8]) {
        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(9 + payload.len());
        buf.push((len >> 16) as u8);
        buf.push((len >> 8) as u8);
        buf.push(len as u8);
        buf.push(kind);
        buf.push(flags);
        buf.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
        buf.extend_from_slice(payload);
        io.write_all(&buf).await.expect("write frame");
        io.flush().await.expect("flush frame");
    }

    /// Read frames, ignoring connection-level SETTINGS/WINDOW_UPDATE
    /// (the only frames the client sends before a request), until a
    /// HEADERS frame is seen, returning its stream id. The request body,
    /// if any, is not interpreted — these fixtures only assert on the
    /// client-observed response.
    pub async fn read_until_request_headers<S: AsyncRead + Unpin>(io: &mut S) -> u32 {
        loop {
            let frame = read_frame(io).await;
            if frame.kind == KIND_HEADERS {
                return frame.stream_id;
            }
        }
    }

    fn encode_integer(buf: &mut Vec<u8>, prefix_bits: u8, prefix_len: u8, mut value: u64) {
        let max_prefix = (1u64 << prefix_len) - 1;
        if value < max_prefix {
            buf.push(prefix_bits | value as u8);
            return;
        }
        buf.push(prefix_bits | max_prefix as u8);
        value -= max_prefix;
        while value >= 128 {
            buf.push(((value % 128) | 0x80) as u8);
            value /= 128;
        }
        buf.push(value as u8);
    }

    fn encode_string(buf: &mut Vec<u8>, s: &[u8]) {
        encode_integer(buf, 0x00, 7, s.len() as u64);
        buf.extend_from_slice(s);
    }

    /// HPACK-encode `fields` as "literal without indexing" entries (raw
    /// octets, Huffman bit unset) — the one encoding this crate's decoder
    /// (`src/engine/h2/hpack.rs`) is guaranteed to accept regardless of
    /// static-table membership.
    pub fn encode_header_block(fields: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (name, value) in fields {
            buf.push(0x00);
            encode_string(&mut buf, name.as_bytes());
            encode_string(&mut buf, value.as_bytes());
        }
        buf
    }

    /// Send a full response (HEADERS, then an optional single DATA frame)
    /// for `stream_id`.
    pub async fn send_response<S: AsyncWrite + Unpin>(
        io: &mut S,
        stream_id: u32,
        status: u16,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) {
        let status_str = status.to_string();
        let mut fields: Vec<(&str, &str)> = vec![(":status", status_str.as_str())];
        fields.extend_from_slice(headers);
        let block = encode_header_block(&fields);

        let headers_flags = FLAG_END_HEADERS | if body.is_none() { FLAG_END_STREAM } else { 0 };
        write_frame(io, KIND_HEADERS, headers_flags, stream_id, &block).await;

        if let Some(data) = body {
            write_frame(io, KIND_DATA, FLAG_END_STREAM, stream_id, data).await;
        }
    }
}
