//! Converts a [`Request`] into an engine conversation and assembles the
//! resulting messages into a [`Response`] with a lazy body.
//!
//! Grounded on `rama-http-core/src/client/dispatch.rs` for the general
//! shape of "send through a channel, get events back on a per-request
//! channel" — simplified to plain `tokio::sync::mpsc` since our engine
//! messages are already a closed tagged sum, with no need for
//! `dispatch::Sender`'s generic `want`-based backpressure signaling.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use tokio::sync::{mpsc, Mutex};

use crate::body::Body;
use crate::engine::Engine;
use crate::error::Error;
use crate::message::{HttpVersion, Message, Request, Response, StreamId};

/// Runs one request to completion against a shared engine, then hands
/// back a [`Response`] whose body (if any) keeps the engine alive for as
/// long as it is being read, alongside the stream id (H2 only) the caller
/// needs to target an eventual `Disconnect`.
pub(crate) async fn execute(
    engine: &Arc<Mutex<Engine>>,
    request: Request,
    url: String,
) -> Result<(Response, StreamId), Error> {
    let Request {
        host,
        scheme,
        path,
        method,
        mut headers,
        body,
    } = request;

    enrich_headers(&mut headers, &host, body.is_some());

    let mut adapter = BodyAdapter::new(body.unwrap_or_else(Body::empty)).await?;
    let (first_chunk, first_more) = adapter.next_pair().await?;

    let ack = {
        let mut guard = engine.lock().await;
        guard
            .send(Message::Request {
                host,
                scheme,
                path,
                method,
                headers,
                body: first_chunk,
                more_body: first_more,
            })
            .await?
    };

    let (http_version, stream_id) = match ack {
        Some(Message::ResponseConnection { http_version, stream_id }) => (http_version, stream_id),
        _ => return Err(Error::protocol("expected ResponseConnection from engine")),
    };

    let mut events = acquire_event_source(engine, http_version, stream_id).await?;

    if first_more {
        loop {
            let (chunk, more) = adapter.next_pair().await?;
            {
                let mut guard = engine.lock().await;
                guard
                    .send(Message::RequestBody {
                        body: chunk.unwrap_or_default(),
                        more_body: more,
                        stream_id,
                    })
                    .await?;
            }
            if !more {
                break;
            }
        }
    }

    let head = events.recv().await?;
    let (status, headers, more_body) = match head {
        Message::Response {
            status,
            headers,
            more_body,
            ..
        } => (status, headers, more_body),
        Message::Disconnect { .. } => return Err(Error::server_disconnected()),
        _ => return Err(Error::protocol("unexpected message while awaiting response head")),
    };

    let body = if more_body {
        Some(Body::from_stream(futures_util::stream::unfold(Some(events), next_body_event)))
    } else {
        None
    };

    Ok((
        Response {
            url,
            status,
            headers,
            body,
        },
        stream_id,
    ))
}

/// One step of the response body stream: pull the next engine message for
/// this response and turn it into a `(chunk, remaining_state)` pair, per
/// `futures_util::stream::unfold`'s contract.
async fn next_body_event(state: Option<EventSource>) -> Option<(Result<Bytes, Error>, Option<EventSource>)> {
    let mut events = state?;
    match events.recv().await {
        Ok(Message::ResponseBody { body, more_body, .. }) => {
            if !more_body && body.is_empty() {
                return None;
            }
            let next_state = if more_body { Some(events) } else { None };
            Some((Ok(body), next_state))
        }
        Ok(Message::Disconnect { .. }) => Some((Err(Error::server_disconnected()), None)),
        Ok(_) => Some((Err(Error::protocol("unexpected message during body read")), None)),
        Err(e) => Some((Err(e), None)),
    }
}

/// Where response events for this request come from: a per-stream
/// channel taken out of the H2 engine (so reading the body never blocks
/// other streams on the same connection), or the shared engine itself
/// for H1, where only one request is ever in flight regardless.
enum EventSource {
    Shared(Arc<Mutex<Engine>>, Option<u32>),
    Owned(mpsc::UnboundedReceiver<Message>),
}

impl EventSource {
    async fn recv(&mut self) -> Result<Message, Error> {
        match self {
            EventSource::Shared(engine, stream_id) => engine.lock().await.receive(*stream_id).await,
            EventSource::Owned(rx) => rx.recv().await.ok_or_else(Error::server_disconnected),
        }
    }
}

async fn acquire_event_source(
    engine: &Arc<Mutex<Engine>>,
    http_version: HttpVersion,
    stream_id: Option<u32>,
) -> Result<EventSource, Error> {
    if http_version != HttpVersion::H2 {
        return Ok(EventSource::Shared(engine.clone(), stream_id));
    }
    let stream_id = stream_id.ok_or_else(|| Error::protocol("h2 ResponseConnection missing stream id"))?;
    let taken = {
        let mut guard = engine.lock().await;
        match &mut *guard {
            Engine::H2(h2) => h2.take_events(stream_id),
            Engine::H1(_) => None,
        }
    };
    match taken {
        Some(rx) => Ok(EventSource::Owned(rx)),
        None => Ok(EventSource::Shared(engine.clone(), Some(stream_id))),
    }
}

/// Reads a user-supplied body one chunk ahead so every emitted pair
/// already knows whether another chunk follows (`spec.md` §4.5).
struct BodyAdapter {
    body: Body,
    lookahead: Option<Bytes>,
    exhausted: bool,
}

impl BodyAdapter {
    async fn new(mut body: Body) -> Result<Self, Error> {
        let lookahead = body.next().await.transpose()?;
        let exhausted = lookahead.is_none();
        Ok(Self {
            body,
            lookahead,
            exhausted,
        })
    }

    async fn next_pair(&mut self) -> Result<(Option<Bytes>, bool), Error> {
        if self.exhausted && self.lookahead.is_none() {
            return Ok((None, false));
        }
        let chunk = self.lookahead.take();
        let next = self.body.next().await.transpose()?;
        let more = next.is_some();
        self.lookahead = next;
        if !more {
            self.exhausted = true;
        }
        Ok((chunk, more))
    }
}

fn enrich_headers(headers: &mut HeaderMap, host: &str, has_body: bool) {
    if !headers.contains_key(http::header::USER_AGENT) {
        headers.insert(http::header::USER_AGENT, user_agent_value());
    }
    if !headers.contains_key(http::header::HOST) {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(http::header::HOST, value);
        }
    }
    if has_body
        && !headers.contains_key(http::header::CONTENT_LENGTH)
        && !headers.contains_key(http::header::TRANSFER_ENCODING)
    {
        headers.insert(http::header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    }
}

/// `os-release` has no portable accessor in the teacher's dependency
/// stack, so it is rendered as the literal `unknown` (see DESIGN.md).
fn user_agent_value() -> HeaderValue {
    let value = format!(
        "bareclient/{} ({}; unknown; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("bareclient"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrich_headers_sets_defaults_once() {
        let mut headers = HeaderMap::new();
        enrich_headers(&mut headers, "example.test", true);
        assert!(headers.contains_key(http::header::USER_AGENT));
        assert_eq!(headers.get(http::header::HOST).unwrap(), "example.test");
        assert_eq!(headers.get(http::header::TRANSFER_ENCODING).unwrap(), "chunked");
    }

    #[test]
    fn enrich_headers_does_not_override_existing() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("4"));
        enrich_headers(&mut headers, "example.test", true);
        assert!(!headers.contains_key(http::header::TRANSFER_ENCODING));
    }

    #[tokio::test]
    async fn body_adapter_reports_lookahead() {
        let body = Body::from_stream(futures_util::stream::iter([
            Ok::<_, Error>(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
        ]));
        let mut adapter = BodyAdapter::new(body).await.unwrap();
        let (chunk, more) = adapter.next_pair().await.unwrap();
        assert_eq!(chunk.unwrap(), Bytes::from_static(b"a"));
        assert!(more);
        let (chunk, more) = adapter.next_pair().await.unwrap();
        assert_eq!(chunk.unwrap(), Bytes::from_static(b"b"));
        assert!(!more);
    }

    #[tokio::test]
    async fn body_adapter_empty_body_is_single_pair() {
        let mut adapter = BodyAdapter::new(Body::empty()).await.unwrap();
        let (chunk, more) = adapter.next_pair().await.unwrap();
        assert!(chunk.is_none());
        assert!(!more);
    }
}
