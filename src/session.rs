//! Public persistent-connection entry point (`spec.md` §6's `HttpSession`).
//!
//! Unlike [`HttpClient`](crate::HttpClient), a session keeps its
//! connection alive across calls to [`request`](HttpSession::request),
//! reusing it while the underlying engine reports itself reusable and
//! transparently reconnecting otherwise, and carries a cookie jar scoped
//! to the session's `(scheme, host, port)`.

use std::sync::Arc;

use http::{HeaderMap, Method};
use tokio::sync::Mutex;

use crate::body::Body;
use crate::config::HttpClientConfig;
use crate::cookiejar::CookieJar;
use crate::engine::Engine;
use crate::error::Error;
use crate::message::{Message, Request, Response};
use crate::middleware::MiddlewareChain;
use crate::requester;
use crate::tunnel;

/// A session bound to one `(scheme, host, port)`, reusing its connection
/// across requests and tracking cookies between them.
pub struct HttpSession {
    scheme: String,
    host: String,
    port: u16,
    config: HttpClientConfig,
    middleware: MiddlewareChain,
    connection: Mutex<Option<Arc<Mutex<Engine>>>>,
    cookies: Mutex<CookieJar>,
}

impl HttpSession {
    #[must_use]
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        let scheme = scheme.into();
        let port = port.unwrap_or(if scheme == "https" { 443 } else { 80 });
        Self {
            scheme,
            host: host.into(),
            port,
            config: HttpClientConfig::default(),
            middleware: MiddlewareChain::default(),
            connection: Mutex::new(None),
            cookies: Mutex::new(CookieJar::new()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    /// Issue `method path` against this session's connection, gathering
    /// applicable cookies onto the request and extracting any
    /// `set-cookie` headers from the response.
    #[tracing::instrument(skip(self, headers, body), fields(host = %self.host, path))]
    pub async fn request(
        &self,
        path: &str,
        method: Method,
        mut headers: HeaderMap,
        body: Option<Body>,
    ) -> Result<Response, Error> {
        let engine = self.ensure_connected().await?;

        if let Some(cookie_header) = self.cookies.lock().await.gather(&self.scheme, &self.host, path) {
            headers.insert(http::header::COOKIE, cookie_header);
        }

        let request = Request {
            host: self.host.clone(),
            scheme: self.scheme.clone(),
            path: self.effective_path(path),
            method,
            headers,
            body,
        };
        let url = format!("{}://{}:{}{}", self.scheme, self.host, self.port, path);

        let core = {
            let engine = engine.clone();
            move |request: Request| -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, Error>> + Send>> {
                let engine = engine.clone();
                let url = url.clone();
                Box::pin(async move {
                    let (response, _stream_id) = requester::execute(&engine, request, url).await?;
                    Ok(response)
                })
            }
        };

        let response = self.middleware.run(request, &core).await?;
        self.cookies.lock().await.extract(&self.host, &response.headers);
        Ok(response)
    }

    /// Close the session's connection, if one is open. A later `request`
    /// transparently reconnects.
    pub async fn close(&self) {
        if let Some(engine) = self.connection.lock().await.take() {
            let _ = engine.lock().await.send(Message::Disconnect { stream_id: None }).await;
        }
    }

    async fn ensure_connected(&self) -> Result<Arc<Mutex<Engine>>, Error> {
        let mut slot = self.connection.lock().await;
        if let Some(engine) = slot.as_ref() {
            if engine.lock().await.is_reusable() {
                return Ok(engine.clone());
            }
        }

        let connected = tunnel::connect(&self.host, self.port, &self.scheme, "/", &self.config).await?;
        let engine = Arc::new(Mutex::new(Engine::for_transport(connected.transport, &self.config).await?));
        *slot = Some(engine.clone());
        Ok(engine)
    }

    /// Rewrite `path` to absolute form when this session is talking to a
    /// plain (non-tunneling) proxy (`spec.md` §4.7).
    fn effective_path(&self, path: &str) -> String {
        if self.config.proxy.is_some() && self.scheme != "https" {
            format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
        } else {
            path.to_owned()
        }
    }
}
