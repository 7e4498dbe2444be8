//! HTTP/1.1 framing engine.
//!
//! A single-cycle state machine: one request in flight at a time, reused
//! across cycles only when the prior response indicated keep-alive.
//! Grounded on the keep-alive / transfer-encoding decision logic in
//! `rama-http-core/src/proto/h1/role.rs`, simplified from that crate's
//! generic `Conn<I, B, T>` machinery to the direct message-passing shape
//! `spec.md` §4.2 calls for.

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, Method};

use crate::config::HttpClientConfig;
use crate::error::Error;
use crate::message::{HttpVersion, Message};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    SendingBody,
    AwaitingStatus,
    AwaitingHeaders,
    StreamingBody,
    Done,
    Closed,
}

enum BodyDecoder {
    None,
    Length(u64),
    Chunked(ChunkedState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    Data(u64),
    Trailer,
}

pub(crate) struct H1Engine {
    transport: Transport,
    read_buf: BytesMut,
    bufsiz: usize,
    read_timeout: Option<std::time::Duration>,
    write_timeout: Option<std::time::Duration>,
    phase: Phase,
    keep_alive: bool,
    decoder: BodyDecoder,
    method: Method,
    chunked_request: bool,
}

impl H1Engine {
    pub(crate) fn new(transport: Transport, config: &HttpClientConfig) -> Self {
        Self {
            transport,
            read_buf: BytesMut::with_capacity(config.h11_bufsiz),
            bufsiz: config.h11_bufsiz,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            phase: Phase::Idle,
            keep_alive: true,
            decoder: BodyDecoder::None,
            method: Method::GET,
            chunked_request: false,
        }
    }

    /// True if a new request cycle can start on this connection.
    pub(crate) fn is_reusable(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Done) && self.keep_alive
    }

    /// Reclaim the underlying transport, discarding framing state, plus
    /// whatever was already read into `read_buf` beyond the response head
    /// (normally empty). Used by the [`tunnel`](crate::tunnel) module once a
    /// `CONNECT` has succeeded, to re-wrap the same bytes with TLS to the
    /// target host.
    pub(crate) fn into_transport(self) -> (Transport, Bytes) {
        (self.transport, self.read_buf.freeze())
    }

    pub(crate) async fn send(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        match msg {
            Message::Request {
                host,
                scheme: _,
                path,
                method,
                headers,
                body,
                more_body,
            } => {
                if self.phase == Phase::Done {
                    self.phase = Phase::Idle;
                }
                self.method = method.clone();
                self.chunked_request = is_chunked(&headers);
                let mut buf = Vec::with_capacity(256);
                write_request_line(&mut buf, &method, &path);
                write_headers(&mut buf, &headers, &host);
                buf.extend_from_slice(b"\r\n");
                if let Some(chunk) = &body {
                    if is_chunked(&headers) {
                        write_chunk(&mut buf, chunk);
                    } else {
                        buf.extend_from_slice(chunk);
                    }
                }
                self.write_timed(&buf).await?;
                self.phase = if more_body {
                    Phase::SendingBody
                } else {
                    self.finish_request_body(self.chunked_request).await?;
                    Phase::AwaitingStatus
                };
                tracing::debug!(%method, path, chunked = self.chunked_request, "h1 request sent");
                Ok(Some(Message::ResponseConnection {
                    http_version: HttpVersion::H11,
                    stream_id: None,
                }))
            }
            Message::RequestBody {
                body, more_body, ..
            } => {
                let mut buf = Vec::with_capacity(body.len() + 16);
                if self.chunked_request {
                    write_chunk(&mut buf, &body);
                } else {
                    buf.extend_from_slice(&body);
                }
                self.write_timed(&buf).await?;
                if !more_body {
                    self.finish_request_body(self.chunked_request).await?;
                    self.phase = Phase::AwaitingStatus;
                }
                Ok(None)
            }
            Message::Disconnect { .. } => {
                tracing::debug!("h1 connection closing");
                self.phase = Phase::Closed;
                let _ = self.transport.shutdown_best_effort().await;
                Ok(None)
            }
            _ => Err(Error::protocol("unexpected message sent to H1 engine")),
        }
    }

    async fn finish_request_body(&mut self, chunked: bool) -> Result<(), Error> {
        if chunked {
            self.write_timed(b"0\r\n\r\n").await?;
        }
        Ok(())
    }

    pub(crate) async fn receive(&mut self) -> Result<Message, Error> {
        match self.phase {
            Phase::AwaitingStatus => self.receive_head().await,
            Phase::StreamingBody => self.receive_body_chunk().await,
            Phase::Done | Phase::Idle => Err(Error::protocol("no response pending")),
            Phase::Closed => Err(Error::server_disconnected()),
            Phase::SendingBody | Phase::AwaitingHeaders => {
                Err(Error::protocol("response requested before request fully sent"))
            }
        }
    }

    async fn receive_head(&mut self) -> Result<Message, Error> {
        loop {
            {
                let mut headers_buf = [httparse::EMPTY_HEADER; 64];
                let mut response = httparse::Response::new(&mut headers_buf);
                match response
                    .parse(&self.read_buf)
                    .map_err(|e| Error::protocol(e))?
                {
                    httparse::Status::Complete(consumed) => {
                        let status = response.code.ok_or_else(|| Error::protocol("missing status code"))?;
                        let mut headers = HeaderMap::new();
                        let mut content_length: Option<u64> = None;
                        let mut chunked = false;
                        let mut close = response.version == Some(0);
                        for h in response.headers.iter() {
                            let name = http::HeaderName::from_bytes(h.name.as_bytes())
                                .map_err(|e| Error::protocol(e))?;
                            let value = http::HeaderValue::from_bytes(h.value)
                                .map_err(|e| Error::protocol(e))?;
                            if name == http::header::CONTENT_LENGTH {
                                content_length = std::str::from_utf8(h.value)
                                    .ok()
                                    .and_then(|v| v.parse().ok());
                            } else if name == http::header::TRANSFER_ENCODING {
                                if std::str::from_utf8(h.value)
                                    .map(|v| v.to_ascii_lowercase().contains("chunked"))
                                    .unwrap_or(false)
                                {
                                    chunked = true;
                                }
                            } else if name == http::header::CONNECTION {
                                if std::str::from_utf8(h.value)
                                    .map(|v| v.to_ascii_lowercase().contains("close"))
                                    .unwrap_or(false)
                                {
                                    close = true;
                                }
                            }
                            headers.append(name, value);
                        }

                        self.keep_alive = !close;
                        self.read_buf.split_to(consumed);

                        let has_body = !matches!(self.method, Method::HEAD)
                            && (chunked || content_length.unwrap_or(0) > 0);

                        self.decoder = if !has_body {
                            BodyDecoder::None
                        } else if chunked {
                            BodyDecoder::Chunked(ChunkedState::Size)
                        } else {
                            BodyDecoder::Length(content_length.unwrap_or(0))
                        };

                        self.phase = if has_body { Phase::StreamingBody } else { Phase::Done };

                        tracing::debug!(status, keep_alive = self.keep_alive, has_body, "h1 response head received");

                        return Ok(Message::Response {
                            status,
                            headers,
                            more_body: has_body,
                            stream_id: None,
                            http_version: HttpVersion::H11,
                        });
                    }
                    httparse::Status::Partial => {}
                }
            }
            self.fill_buf().await?;
        }
    }

    async fn receive_body_chunk(&mut self) -> Result<Message, Error> {
        loop {
            match &mut self.decoder {
                BodyDecoder::None => {
                    self.phase = Phase::Done;
                    return Ok(Message::ResponseBody {
                        body: Bytes::new(),
                        more_body: false,
                        stream_id: None,
                    });
                }
                BodyDecoder::Length(remaining) => {
                    if *remaining == 0 {
                        self.phase = Phase::Done;
                        return Ok(Message::ResponseBody {
                            body: Bytes::new(),
                            more_body: false,
                            stream_id: None,
                        });
                    }
                    if self.read_buf.is_empty() {
                        self.fill_buf().await?;
                        continue;
                    }
                    let take = (*remaining).min(self.read_buf.len() as u64) as usize;
                    let chunk = self.read_buf.split_to(take).freeze();
                    *remaining -= take as u64;
                    let more = *remaining > 0;
                    if !more {
                        self.phase = Phase::Done;
                    }
                    return Ok(Message::ResponseBody {
                        body: chunk,
                        more_body: more,
                        stream_id: None,
                    });
                }
                BodyDecoder::Chunked(state) => match *state {
                    ChunkedState::Size => {
                        if let Some(pos) = find_crlf(&self.read_buf) {
                            let line = self.read_buf.split_to(pos).freeze();
                            self.read_buf.advance(2);
                            let line_str = std::str::from_utf8(&line)
                                .map_err(|e| Error::protocol(e))?;
                            let size_str = line_str.split(';').next().unwrap_or("").trim();
                            let size = u64::from_str_radix(size_str, 16)
                                .map_err(|e| Error::protocol(e))?;
                            *state = if size == 0 {
                                ChunkedState::Trailer
                            } else {
                                ChunkedState::Data(size)
                            };
                        } else {
                            self.fill_buf().await?;
                        }
                    }
                    ChunkedState::Data(remaining) => {
                        if self.read_buf.is_empty() {
                            self.fill_buf().await?;
                            continue;
                        }
                        let take = remaining.min(self.read_buf.len() as u64) as usize;
                        let chunk = self.read_buf.split_to(take).freeze();
                        let left = remaining - take as u64;
                        if left == 0 {
                            // consume trailing CRLF once available
                            loop {
                                if self.read_buf.len() >= 2 {
                                    self.read_buf.advance(2);
                                    break;
                                }
                                self.fill_buf().await?;
                            }
                            *state = ChunkedState::Size;
                        } else {
                            *state = ChunkedState::Data(left);
                        }
                        return Ok(Message::ResponseBody {
                            body: chunk,
                            more_body: true,
                            stream_id: None,
                        });
                    }
                    ChunkedState::Trailer => {
                        if let Some(pos) = find_crlf(&self.read_buf) {
                            if pos == 0 {
                                self.read_buf.advance(2);
                                self.phase = Phase::Done;
                                tracing::trace!("h1 chunked response body complete");
                                return Ok(Message::ResponseBody {
                                    body: Bytes::new(),
                                    more_body: false,
                                    stream_id: None,
                                });
                            }
                            self.read_buf.advance(pos + 2);
                        } else {
                            self.fill_buf().await?;
                        }
                    }
                },
            }
        }
    }

    async fn fill_buf(&mut self) -> Result<(), Error> {
        let mut tmp = vec![0u8; self.bufsiz];
        let n = self
            .transport
            .read_timeout(&mut tmp, self.read_timeout)
            .await?;
        if n == 0 {
            return Err(Error::server_disconnected());
        }
        self.read_buf.extend_from_slice(&tmp[..n]);
        Ok(())
    }

    async fn write_timed(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.transport
            .write_all_timeout(buf, self.write_timeout)
            .await
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
}

fn write_request_line(buf: &mut Vec<u8>, method: &Method, path: &str) {
    buf.extend_from_slice(method.as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(path.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\n");
}

fn write_headers(buf: &mut Vec<u8>, headers: &HeaderMap, _host: &str) {
    for (name, value) in headers.iter() {
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

fn write_chunk(buf: &mut Vec<u8>, chunk: &[u8]) {
    if chunk.is_empty() {
        return;
    }
    use std::fmt::Write as _;
    let mut size_line = String::new();
    let _ = write!(size_line, "{:x}", chunk.len());
    buf.extend_from_slice(size_line.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(chunk);
    buf.extend_from_slice(b"\r\n");
}
