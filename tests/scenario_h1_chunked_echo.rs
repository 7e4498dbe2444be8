//! POST with a streaming, length-unknown body over TLS h11: the requester
//! must add `transfer-encoding: chunked` since no `content-length` was
//! given, and the chunked-framing round trip must preserve the body
//! exactly (spec.md §8 scenario 3).

mod common;

use bareclient::{AlpnProtocol, Body, HttpClient, HttpClientConfig};
use bytes::Bytes;
use http::{HeaderMap, Method};

const TEST_CERT_PEM: &str = include_str!("fixtures/test_cert.pem");

#[tokio::test]
async fn chunked_post_body_is_echoed() {
    let (addr, listener) = common::bind_loopback().await;
    let acceptor = common::tls_acceptor(&[b"http/1.1"]);

    let server = tokio::spawn(async move {
        let mut tls = common::accept_tls(&listener, &acceptor).await;
        let head = common::read_h1_request_head(&mut tls).await;
        assert!(head.starts_with("POST /u HTTP/1.1"), "{head}");
        assert!(
            head.to_ascii_lowercase().contains("transfer-encoding: chunked"),
            "requester should add transfer-encoding: chunked when no content-length is set: {head}"
        );

        let received = common::read_chunked_body(&mut tls).await;
        assert_eq!(received, b"aabb");

        common::write_all(
            &mut tls,
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\ncontent-type: text/plain\r\n\r\n4\r\naabb\r\n0\r\n\r\n",
        )
        .await;
    });

    let config = HttpClientConfig {
        cadata: Some(TEST_CERT_PEM.to_owned()),
        alpn_protocols: vec![AlpnProtocol::Http2, AlpnProtocol::Http11],
        ..HttpClientConfig::default()
    };
    let client = HttpClient::with_config(config);
    let url = format!("https://localhost:{}/u", addr.port());
    let body = Body::from_stream(futures_util::stream::iter([
        Ok::<_, bareclient::Error>(Bytes::from_static(b"aa")),
        Ok(Bytes::from_static(b"bb")),
    ]));
    let response = client
        .send(&url, Method::POST, HeaderMap::new(), Some(body))
        .await
        .expect("chunked request succeeds");

    assert_eq!(response.status, 200);
    let raw = response.raw().await.expect("read body");
    assert_eq!(raw.as_ref(), b"aabb");

    server.await.expect("server task panicked");
}
