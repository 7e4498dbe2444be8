//! Session cookie round-trip over a reused connection (spec.md §8
//! scenario 5): a `set-cookie` from the first response is carried on a
//! later request to the same session. The complementary half of this
//! scenario — a `Secure` cookie withheld from a later plain-http request —
//! is regression-tested at the jar level in `src/cookiejar.rs`, since
//! `HttpSession` is scheme-fixed at construction and there is no public
//! way to replay one session's jar against a different scheme.

mod common;

use bareclient::{HttpClientConfig, HttpSession};
use http::{HeaderMap, Method};

const TEST_CERT_PEM: &str = include_str!("fixtures/test_cert.pem");

#[tokio::test]
async fn session_carries_cookie_set_by_earlier_response() {
    let (addr, listener) = common::bind_loopback().await;
    let acceptor = common::tls_acceptor(&[b"http/1.1"]);

    let server = tokio::spawn(async move {
        let mut tls = common::accept_tls(&listener, &acceptor).await;

        let first_head = common::read_h1_request_head(&mut tls).await;
        assert!(first_head.starts_with("GET / HTTP/1.1"), "{first_head}");
        common::write_all(
            &mut tls,
            b"HTTP/1.1 200 OK\r\nset-cookie: sid=abc; Path=/; Secure\r\ncontent-length: 0\r\n\r\n",
        )
        .await;

        let second_head = common::read_h1_request_head(&mut tls).await;
        assert!(second_head.starts_with("GET /x HTTP/1.1"), "{second_head}");
        assert!(
            second_head.to_ascii_lowercase().contains("cookie: sid=abc"),
            "second request on the same session should carry the earlier cookie: {second_head}"
        );
        common::write_all(&mut tls, b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
    });

    let config = HttpClientConfig {
        cadata: Some(TEST_CERT_PEM.to_owned()),
        ..HttpClientConfig::default()
    };
    let session = HttpSession::new("https", "localhost", Some(addr.port())).with_config(config);

    let first = session
        .request("/", Method::GET, HeaderMap::new(), None)
        .await
        .expect("first request succeeds");
    assert_eq!(first.status, 200);

    let second = session
        .request("/x", Method::GET, HeaderMap::new(), None)
        .await
        .expect("second request succeeds");
    assert_eq!(second.status, 200);

    server.await.expect("server task panicked");
}
