//! Proxy `CONNECT` tunneling (spec.md §8 scenario 6): a successful tunnel
//! re-handshakes TLS to the target over the same socket and completes the
//! request; a refused tunnel surfaces `proxy_status()` without ever
//! attempting TLS.

mod common;

use bareclient::{HttpClient, HttpClientConfig};
use http::{HeaderMap, Method};

const TEST_CERT_PEM: &str = include_str!("fixtures/test_cert.pem");

#[tokio::test]
async fn successful_tunnel_reaches_target_over_tls() {
    let (addr, listener) = common::bind_loopback().await;
    let acceptor = common::tls_acceptor(&[b"http/1.1"]);

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept proxy connection");
        let mut tcp = tcp;
        let connect_head = common::read_h1_request_head(&mut tcp).await;
        assert!(connect_head.starts_with("CONNECT localhost:"), "{connect_head}");
        common::write_all(&mut tcp, b"HTTP/1.1 200 Connection Established\r\n\r\n").await;

        let mut tls = acceptor.accept(tcp).await.expect("tls handshake over tunnel");
        let get_head = common::read_h1_request_head(&mut tls).await;
        assert!(get_head.starts_with("GET /a HTTP/1.1"), "{get_head}");
        common::write_all(&mut tls, b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok").await;
    });

    let config = HttpClientConfig {
        cadata: Some(TEST_CERT_PEM.to_owned()),
        proxy: Some(format!("http://127.0.0.1:{}", addr.port()).parse().expect("valid proxy uri")),
        ..HttpClientConfig::default()
    };
    let client = HttpClient::with_config(config);
    let url = format!("https://localhost:{}/a", addr.port());
    let response = client
        .send(&url, Method::GET, HeaderMap::new(), None)
        .await
        .expect("tunneled request succeeds");

    assert_eq!(response.status, 200);
    let body = response.raw().await.expect("read body");
    assert_eq!(body.as_ref(), b"ok");

    server.await.expect("server task panicked");
}

#[tokio::test]
async fn refused_tunnel_surfaces_proxy_error_without_tls() {
    let (addr, listener) = common::bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.expect("accept proxy connection");
        let connect_head = common::read_h1_request_head(&mut tcp).await;
        assert!(connect_head.starts_with("CONNECT localhost:"), "{connect_head}");
        common::write_all(
            &mut tcp,
            b"HTTP/1.1 407 Proxy Authentication Required\r\ncontent-length: 0\r\n\r\n",
        )
        .await;
    });

    let config = HttpClientConfig {
        proxy: Some(format!("http://127.0.0.1:{}", addr.port()).parse().expect("valid proxy uri")),
        ..HttpClientConfig::default()
    };
    let client = HttpClient::with_config(config);
    let url = format!("https://localhost:{}/a", addr.port());
    let err = client
        .send(&url, Method::GET, HeaderMap::new(), None)
        .await
        .expect_err("a refused CONNECT should surface as an error");

    assert_eq!(err.proxy_status(), Some(407));

    server.await.expect("server task panicked");
}
