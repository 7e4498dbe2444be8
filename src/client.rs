//! Public one-shot request entry point (`spec.md` §6's `HttpClient`).
//!
//! Builds a connection for exactly one request, drives it through the
//! middleware chain and the requester, and tears the connection down once
//! the caller is done with the response body — the Rust expression of
//! "scope exit closes the underlying connection" (`spec.md` §6), via a
//! `Drop` guard on the body rather than an async scope type, since async
//! `Drop` does not exist (see DESIGN.md).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as SyncMutex};
use std::task::{Context, Poll};

use http::{HeaderMap, Method};
use tokio::sync::Mutex;

use crate::body::{Body, BodyItem};
use crate::config::HttpClientConfig;
use crate::engine::Engine;
use crate::error::Error;
use crate::message::{Message, Request, Response, StreamId};
use crate::middleware::MiddlewareChain;
use crate::requester;
use crate::tunnel;

/// A reusable builder for one-shot requests. Each [`send`](Self::send)
/// call opens its own connection and closes it once the response body is
/// fully read or dropped; no state is shared between calls.
#[derive(Clone, Default)]
pub struct HttpClient {
    config: HttpClientConfig,
    middleware: MiddlewareChain,
}

impl HttpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            middleware: MiddlewareChain::default(),
        }
    }

    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    /// Issue one request to `url` and return its response. The connection
    /// backing the response is closed once its body is exhausted or
    /// dropped (immediately, if there is no body).
    #[tracing::instrument(skip(self, headers, body), fields(url))]
    pub async fn send(
        &self,
        url: &str,
        method: Method,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> Result<Response, Error> {
        let parsed = ParsedUrl::parse(url)?;
        let connected = tunnel::connect(&parsed.host, parsed.port, &parsed.scheme, &parsed.path, &self.config).await?;
        let path = connected.path_override.unwrap_or(parsed.path);
        let engine = Arc::new(Mutex::new(Engine::for_transport(connected.transport, &self.config).await?));

        let request = Request {
            host: parsed.host,
            scheme: parsed.scheme,
            path,
            method,
            headers,
            body,
        };

        let stream_id_slot: Arc<SyncMutex<StreamId>> = Arc::new(SyncMutex::new(None));
        let core = {
            let engine = engine.clone();
            let url = url.to_owned();
            let slot = stream_id_slot.clone();
            move |request: Request| -> Pin<Box<dyn Future<Output = Result<Response, Error>> + Send>> {
                let engine = engine.clone();
                let url = url.clone();
                let slot = slot.clone();
                Box::pin(async move {
                    let (response, stream_id) = requester::execute(&engine, request, url).await?;
                    *slot.lock().unwrap() = stream_id;
                    Ok(response)
                })
            }
        };

        let mut response = self.middleware.run(request, &core).await?;
        let stream_id = *stream_id_slot.lock().unwrap();

        response.body = match response.body.take() {
            Some(body) => Some(Body::from_stream(GuardedBody {
                inner: body,
                _guard: DisconnectGuard::armed(engine, stream_id),
            })),
            None => {
                DisconnectGuard::armed(engine, stream_id).fire_now().await;
                None
            }
        };

        Ok(response)
    }
}

struct ParsedUrl {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl ParsedUrl {
    fn parse(url: &str) -> Result<Self, Error> {
        let uri: http::Uri = url.parse().map_err(|e| Error::protocol(e))?;
        let scheme = uri.scheme_str().unwrap_or("http").to_owned();
        let host = uri
            .host()
            .ok_or_else(|| Error::protocol("url has no host"))?
            .to_owned();
        let default_port = if scheme == "https" { 443 } else { 80 };
        let port = uri.port_u16().unwrap_or(default_port);
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned());
        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }
}

/// Sends a one-shot `Disconnect` to the shared engine once there is
/// nothing left to read, either eagerly (no response body) or when the
/// last reader of the body drops.
struct DisconnectGuard {
    engine: Option<Arc<Mutex<Engine>>>,
    stream_id: StreamId,
}

impl DisconnectGuard {
    fn armed(engine: Arc<Mutex<Engine>>, stream_id: StreamId) -> Self {
        Self {
            engine: Some(engine),
            stream_id,
        }
    }

    async fn fire_now(mut self) {
        if let Some(engine) = self.engine.take() {
            let _ = engine.lock().await.send(Message::Disconnect { stream_id: self.stream_id }).await;
        }
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            let stream_id = self.stream_id;
            tokio::spawn(async move {
                let _ = engine.lock().await.send(Message::Disconnect { stream_id }).await;
            });
        }
    }
}

/// A response body with a [`DisconnectGuard`] riding along, dropped (and
/// so firing the engine `Disconnect`) exactly when the body is.
struct GuardedBody {
    inner: Body,
    _guard: DisconnectGuard,
}

impl futures_core::Stream for GuardedBody {
    type Item = BodyItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}
