//! `bareclient`: an asynchronous HTTP/1.1 and HTTP/2 client.
//!
//! ALPN picks the wire protocol per connection; a single [`HttpClient`]
//! issues one request per connection, while [`HttpSession`] keeps a
//! connection (and a cookie jar) alive across requests to the same
//! origin. Proxy `CONNECT` tunneling, gzip/deflate body compression and a
//! request/response middleware chain are supported; caching, redirect
//! following and connection pooling across hosts are not (see
//! `DESIGN.md`).
//!
//! ```no_run
//! # async fn run() -> Result<(), bareclient::Error> {
//! use bareclient::HttpClient;
//! use http::{HeaderMap, Method};
//!
//! let client = HttpClient::new();
//! let response = client
//!     .send("https://example.test/", Method::GET, HeaderMap::new(), None)
//!     .await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

pub mod body;
pub mod config;
pub mod message;
pub mod middleware;

mod client;
mod compress;
mod cookiejar;
mod engine;
mod error;
mod requester;
mod session;
mod transport;
mod tunnel;

pub use self::body::Body;
pub use self::client::HttpClient;
pub use self::config::{AlpnProtocol, HttpClientConfig, TlsOptions};
pub use self::error::{ConnectKind, Error, Result};
pub use self::message::{Request, Response};
pub use self::session::HttpSession;
