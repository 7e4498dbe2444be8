//! Protocol Facade: a single `Engine` type hiding the H1/H2 wire
//! differences from the requester (`spec.md` §4).

mod h1;
mod h2;

use crate::config::{AlpnProtocol, HttpClientConfig};
use crate::error::Error;
use crate::message::Message;
use crate::transport::Transport;

pub(crate) use h1::H1Engine;
pub(crate) use h2::H2Engine;

pub(crate) enum Engine {
    H1(H1Engine),
    H2(H2Engine),
}

impl Engine {
    /// Build the engine matching what ALPN (or the absence of TLS)
    /// negotiated on `transport`.
    pub(crate) async fn for_transport(transport: Transport, config: &HttpClientConfig) -> Result<Self, Error> {
        match transport.alpn {
            AlpnProtocol::Http2 => Ok(Engine::H2(H2Engine::handshake(transport, config).await?)),
            AlpnProtocol::Http11 => Ok(Engine::H1(H1Engine::new(transport, config))),
        }
    }

    pub(crate) async fn send(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        match self {
            Engine::H1(h1) => h1.send(msg).await,
            Engine::H2(h2) => h2.send(msg).await,
        }
    }

    /// Receive the next event for `stream_id`. H1 connections carry a
    /// single request at a time, so `stream_id` is ignored there.
    pub(crate) async fn receive(&mut self, stream_id: Option<u32>) -> Result<Message, Error> {
        match self {
            Engine::H1(h1) => h1.receive().await,
            Engine::H2(h2) => {
                let stream_id = stream_id.ok_or_else(|| Error::protocol("H2 receive without a stream id"))?;
                h2.receive(stream_id).await
            }
        }
    }

    /// True if a new request cycle can be multiplexed onto this engine
    /// without opening a fresh connection.
    pub(crate) fn is_reusable(&self) -> bool {
        match self {
            Engine::H1(h1) => h1.is_reusable(),
            Engine::H2(h2) => h2.is_connected(),
        }
    }
}
