//! Request/response middleware, composed right-to-left around the
//! requester's core send (`spec.md` §4.6).
//!
//! Grounded on `rama-core/src/service/svc.rs`'s `Service`/`BoxService`
//! split: the trait itself is dyn-incompatible if written with `-> impl
//! Future`, so `Middleware::handle` is hand-boxed the same way
//! `BoxService::serve` is, making `Arc<dyn Middleware>` usable directly
//! without an extra boxing adapter type.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine as _;
use http::HeaderValue;

use crate::error::Error;
use crate::message::{Request, Response};

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The remaining chain, hiding both the inner middlewares and the
/// requester's core send behind one callable.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    core: &'a (dyn Fn(Request) -> BoxFuture<'static, Result<Response, Error>> + Send + Sync),
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        chain: &'a [Arc<dyn Middleware>],
        core: &'a (dyn Fn(Request) -> BoxFuture<'static, Result<Response, Error>> + Send + Sync),
    ) -> Self {
        Self { chain, core }
    }

    /// Run the rest of the chain (and ultimately the requester's core
    /// send) against `request`.
    pub fn run(self, request: Request) -> BoxFuture<'a, Result<Response, Error>> {
        match self.chain.split_first() {
            Some((mw, rest)) => {
                let next = Next {
                    chain: rest,
                    core: self.core,
                };
                mw.handle(request, next)
            }
            None => (self.core)(request),
        }
    }
}

/// A request/response transformer. Implementors may inspect or replace
/// the request, short-circuit with a synthesized response, or wrap the
/// response returned by `next` (e.g. to decompress its body).
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Result<Response, Error>>;
}

/// An ordered list of middlewares, outermost first.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub(crate) fn run<'a>(
        &'a self,
        request: Request,
        core: &'a (dyn Fn(Request) -> BoxFuture<'static, Result<Response, Error>> + Send + Sync),
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Next::new(&self.middlewares, core).run(request)
    }
}

/// Prepends `authorization: Basic <base64(username:password)>` unless the
/// request already carries an `authorization` header.
pub struct BasicAuthMiddleware {
    value: HeaderValue,
}

impl BasicAuthMiddleware {
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        let credentials = format!("{username}:{password}");
        let encoded = BASE64.encode(credentials);
        let value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .expect("base64 output is always a valid header value");
        Self { value }
    }
}

impl Middleware for BasicAuthMiddleware {
    fn handle<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            if !request.headers.contains_key(http::header::AUTHORIZATION) {
                request.headers.insert(http::header::AUTHORIZATION, self.value.clone());
            }
            next.run(request).await
        })
    }
}

/// Wraps request/response bodies with gzip/deflate (de)compression based
/// on `content-encoding`, layered left-to-right outbound and
/// right-to-left inbound.
#[derive(Default)]
pub struct CompressionMiddleware {
    _private: (),
}

impl CompressionMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Middleware for CompressionMiddleware {
    fn handle<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            if let (Some(body), Some(encodings)) = (
                request.body.take(),
                encoding_list(&request.headers, http::header::CONTENT_ENCODING),
            ) {
                request.body = Some(crate::compress::compress_body(body, &encodings));
            }

            let mut response = next.run(request).await?;

            if let Some(encodings) = encoding_list(&response.headers, http::header::CONTENT_ENCODING) {
                if let Some(body) = response.body.take() {
                    response.body = Some(crate::compress::decompress_body(body, &encodings));
                }
            }

            Ok(response)
        })
    }
}

fn encoding_list(headers: &http::HeaderMap, name: http::HeaderName) -> Option<Vec<String>> {
    let value = headers.get(name)?.to_str().ok()?;
    let list: Vec<String> = value
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| s == "gzip" || s == "deflate")
        .collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}
