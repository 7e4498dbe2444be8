//! GET over plain h11 returning 204 No Content (spec.md §8 scenario 2).

mod common;

use bareclient::HttpClient;
use http::{HeaderMap, Method};

#[tokio::test]
async fn h11_get_no_content_has_no_body() {
    let (addr, listener) = common::bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.expect("accept tcp");
        let head = common::read_h1_request_head(&mut tcp).await;
        assert!(head.starts_with("GET /a HTTP/1.1"), "{head}");
        common::write_all(&mut tcp, b"HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n").await;
    });

    let client = HttpClient::new();
    let url = format!("http://localhost:{}/a", addr.port());
    let response = client
        .send(&url, Method::GET, HeaderMap::new(), None)
        .await
        .expect("h11 request succeeds");

    assert_eq!(response.status, 204);
    assert!(response.body.is_none());

    server.await.expect("server task panicked");
}
