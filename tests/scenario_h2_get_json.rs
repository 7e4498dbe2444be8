//! GET over h2 returning a JSON body (spec.md §8 scenario 4).

mod common;

use bareclient::{AlpnProtocol, HttpClient, HttpClientConfig};
use http::{HeaderMap, Method};
use serde_json::json;

const TEST_CERT_PEM: &str = include_str!("fixtures/test_cert.pem");

#[tokio::test]
async fn h2_get_returns_json_body() {
    let (addr, listener) = common::bind_loopback().await;
    let acceptor = common::tls_acceptor(&[b"h2"]);

    let server = tokio::spawn(async move {
        let mut tls = common::accept_tls(&listener, &acceptor).await;
        common::h2raw::read_preface(&mut tls).await;
        let stream_id = common::h2raw::read_until_request_headers(&mut tls).await;
        common::h2raw::send_response(
            &mut tls,
            stream_id,
            200,
            &[("content-type", "application/json")],
            Some(br#"{"x":1}"#),
        )
        .await;
    });

    let config = HttpClientConfig {
        cadata: Some(TEST_CERT_PEM.to_owned()),
        alpn_protocols: vec![AlpnProtocol::Http2, AlpnProtocol::Http11],
        ..HttpClientConfig::default()
    };
    let client = HttpClient::with_config(config);
    let url = format!("https://localhost:{}/j", addr.port());
    let response = client
        .send(&url, Method::GET, HeaderMap::new(), None)
        .await
        .expect("h2 request succeeds");

    assert_eq!(response.status, 200);
    let value: serde_json::Value = response.json().await.expect("decode json body");
    assert_eq!(value, json!({"x": 1}));

    server.await.expect("server task panicked");
}
