//! The HTTP/2 engine: connection preface, SETTINGS exchange, and a
//! single actor task that owns the transport and multiplexes concurrent
//! streams over it.
//!
//! Grounded on `rama-http-core/src/proto/h2/client.rs` for the
//! connection-bootstrap shape (send preface + initial SETTINGS, spawn a
//! task that owns the socket) and `h2/proto/streams/state.rs` /
//! `h2/frame/settings.rs` for the state machine and settings constants
//! this module re-derives in [`stream`] and [`frame`]. Unlike
//! `rama-http-core`'s generic `h2` crate (which serves servers and
//! supports push), this engine is client-only: it never reserves
//! streams, and advertises `ENABLE_PUSH=0`.

mod frame;
mod hpack;
mod stream;

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method};
use tokio::sync::mpsc;

use crate::config::HttpClientConfig;
use crate::error::Error;
use crate::message::{HttpVersion, Message};
use crate::transport::Transport;

use frame::{Kind, Reason};
use stream::{FlowControl, State, Stream};

/// Local settings this client advertises on every connection (`spec.md`
/// §4.3): push disabled, a conservative concurrent-stream cap, and a
/// header-list-size ceiling to bound peer-controlled memory use.
const LOCAL_MAX_CONCURRENT_STREAMS: u32 = 100;
const LOCAL_MAX_HEADER_LIST_SIZE: u32 = 65_536;
const CONNECTION_WINDOW_BONUS: u32 = 1 << 24;

/// A handle to a running H2 connection. Cheap to hand to the requester
/// per-request; the actual state lives in the spawned task.
pub(crate) struct H2Engine {
    next_stream_id: u32,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: HashMap<u32, mpsc::UnboundedReceiver<Message>>,
}

enum Command {
    SendRequest {
        stream_id: u32,
        host: String,
        scheme: String,
        path: String,
        method: Method,
        headers: HeaderMap,
        body: Option<Bytes>,
        more_body: bool,
        events: mpsc::UnboundedSender<Message>,
    },
    SendBody {
        stream_id: u32,
        body: Bytes,
        more_body: bool,
    },
    Disconnect {
        stream_id: Option<u32>,
    },
}

impl H2Engine {
    /// Write the connection preface and initial SETTINGS, then spawn the
    /// connection actor. `transport` must already have negotiated h2 via
    /// ALPN.
    #[tracing::instrument(skip(transport, config))]
    pub(crate) async fn handshake(mut transport: Transport, config: &HttpClientConfig) -> Result<Self, Error> {
        use tokio::io::AsyncWriteExt;
        transport.write_all(frame::PREFACE).await.map_err(Error::io)?;

        let local_settings = [
            (frame::SETTINGS_ENABLE_PUSH, 0),
            (
                frame::SETTINGS_MAX_CONCURRENT_STREAMS,
                LOCAL_MAX_CONCURRENT_STREAMS,
            ),
            (
                frame::SETTINGS_MAX_HEADER_LIST_SIZE,
                LOCAL_MAX_HEADER_LIST_SIZE,
            ),
        ];
        let payload = frame::encode_settings(&local_settings);
        frame::write_frame(&mut transport, Kind::Settings, 0, 0, &payload).await?;

        // Grant the peer extra connection-level window up front so a
        // response body larger than the 64 KiB default doesn't stall on
        // a round trip before we've even read anything.
        frame::write_frame(
            &mut transport,
            Kind::WindowUpdate,
            0,
            0,
            &frame::window_update_payload(CONNECTION_WINDOW_BONUS),
        )
        .await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let read_timeout = config.read_timeout;
        let write_timeout = config.write_timeout;
        tokio::spawn(async move {
            if let Err(e) = Connection::new(transport, cmd_rx, read_timeout, write_timeout)
                .run()
                .await
            {
                tracing::debug!(error = %e, "h2 connection actor exited");
            }
        });

        Ok(Self {
            next_stream_id: 1,
            cmd_tx,
            events: HashMap::new(),
        })
    }

    pub(crate) async fn send(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        match msg {
            Message::Request {
                host,
                scheme,
                path,
                method,
                headers,
                body,
                more_body,
            } => {
                let stream_id = self.next_stream_id;
                self.next_stream_id += 2;
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                self.cmd_tx
                    .send(Command::SendRequest {
                        stream_id,
                        host,
                        scheme,
                        path,
                        method,
                        headers,
                        body,
                        more_body,
                        events: events_tx,
                    })
                    .map_err(|_| Error::closed())?;
                self.events.insert(stream_id, events_rx);
                Ok(Some(Message::ResponseConnection {
                    http_version: HttpVersion::H2,
                    stream_id: Some(stream_id),
                }))
            }
            Message::RequestBody {
                body,
                more_body,
                stream_id,
            } => {
                let stream_id = stream_id.ok_or_else(|| Error::protocol("H2 RequestBody missing stream id"))?;
                self.cmd_tx
                    .send(Command::SendBody {
                        stream_id,
                        body,
                        more_body,
                    })
                    .map_err(|_| Error::closed())?;
                Ok(None)
            }
            Message::Disconnect { stream_id } => {
                let _ = self.cmd_tx.send(Command::Disconnect { stream_id });
                Ok(None)
            }
            _ => Err(Error::protocol("unexpected message sent to H2 engine")),
        }
    }

    pub(crate) async fn receive(&mut self, stream_id: u32) -> Result<Message, Error> {
        let rx = self
            .events
            .get_mut(&stream_id)
            .ok_or_else(|| Error::protocol("receive on unknown H2 stream"))?;
        rx.recv().await.ok_or_else(Error::server_disconnected)
    }

    /// Take ownership of `stream_id`'s event channel so the caller can
    /// keep pulling `ResponseBody` messages without holding this engine's
    /// lock for the duration — see `requester::EventSource`.
    pub(crate) fn take_events(&mut self, stream_id: u32) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.events.remove(&stream_id)
    }

    /// True while the connection actor spawned by [`handshake`](Self::handshake)
    /// is still running. `cmd_tx.is_closed()` flips once that task's
    /// receiver is dropped, which happens when `Connection::run` returns
    /// (GOAWAY, a transport error, or a read EOF).
    pub(crate) fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

struct StreamActor {
    stream: Stream,
    events: mpsc::UnboundedSender<Message>,
    pending_body: VecDeque<(Bytes, bool)>,
    header_block: BytesMut,
}

/// Owns the transport exclusively. All reads, writes, and flow-control
/// bookkeeping happen on this single task, so there is no need for
/// interior mutability anywhere in [`Stream`]/[`FlowControl`].
struct Connection {
    transport: Transport,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    read_timeout: Option<std::time::Duration>,
    write_timeout: Option<std::time::Duration>,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    streams: HashMap<u32, StreamActor>,
    conn_send_window: FlowControl,
    conn_recv_window: FlowControl,
    peer_max_frame_size: u32,
    peer_initial_window_size: u32,
    goaway_received: bool,
}

impl Connection {
    fn new(
        transport: Transport,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        read_timeout: Option<std::time::Duration>,
        write_timeout: Option<std::time::Duration>,
    ) -> Self {
        Self {
            transport,
            cmd_rx,
            read_timeout,
            write_timeout,
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            streams: HashMap::new(),
            conn_send_window: FlowControl::new(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            conn_recv_window: FlowControl::new(frame::DEFAULT_INITIAL_WINDOW_SIZE + CONNECTION_WINDOW_BONUS),
            peer_max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            peer_initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            goaway_received: false,
        }
    }

    async fn run(mut self) -> Result<(), Error> {
        loop {
            let max_frame_size = self.peer_max_frame_size.max(frame::DEFAULT_MAX_FRAME_SIZE);
            let read_timeout = self.read_timeout;
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await?,
                        None => return Ok(()),
                    }
                }
                frame = async {
                    let fut = frame::read_frame(&mut self.transport, max_frame_size);
                    match read_timeout {
                        Some(t) => tokio::time::timeout(t, fut).await.map_err(|_| Error::read_timeout())?,
                        None => fut.await,
                    }
                } => {
                    self.handle_frame(frame?).await?;
                }
            }
            if self.goaway_received && self.streams.values().all(|s| s.stream.state.is_closed()) {
                return Ok(());
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<(), Error> {
        match cmd {
            Command::SendRequest {
                stream_id,
                host,
                scheme,
                path,
                method,
                headers,
                body,
                more_body,
                events,
            } => {
                if self.goaway_received {
                    // Dropping `events` without sending closes the
                    // facade's receiver, which surfaces as a
                    // `server_disconnected` error on the pending receive.
                    drop(events);
                    return Ok(());
                }
                self.send_request(stream_id, host, scheme, path, method, headers, body, more_body, events)
                    .await
            }
            Command::SendBody {
                stream_id,
                body,
                more_body,
            } => {
                if let Some(actor) = self.streams.get_mut(&stream_id) {
                    actor.pending_body.push_back((body, more_body));
                }
                self.flush_stream_body(stream_id).await
            }
            Command::Disconnect { stream_id } => match stream_id {
                Some(id) => self.reset_stream(id, Reason::CANCEL).await,
                None => {
                    let last = self.streams.keys().copied().max().unwrap_or(0);
                    frame::write_frame(
                        &mut self.transport,
                        Kind::GoAway,
                        0,
                        0,
                        &frame::goaway_payload(last, Reason::NO_ERROR),
                    )
                    .await
                }
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_request(
        &mut self,
        stream_id: u32,
        host: String,
        scheme: String,
        path: String,
        method: Method,
        headers: HeaderMap,
        body: Option<Bytes>,
        more_body: bool,
        events: mpsc::UnboundedSender<Message>,
    ) -> Result<(), Error> {
        let end_stream = body.is_none() && !more_body;
        let fields = hpack::request_fields(&method, &scheme, &host, &path, &headers);
        let block = self.encoder.encode(&fields);

        let mut stream = Stream::new(
            stream_id,
            self.peer_initial_window_size,
            frame::DEFAULT_INITIAL_WINDOW_SIZE,
        );
        stream.state.send_open(end_stream)?;
        tracing::debug!(stream_id, %method, path, "h2 stream opened");

        self.write_header_block(stream_id, &block, end_stream).await?;

        let actor = StreamActor {
            stream,
            events,
            pending_body: VecDeque::new(),
            header_block: BytesMut::new(),
        };
        self.streams.insert(stream_id, actor);

        if let Some(chunk) = body {
            if let Some(actor) = self.streams.get_mut(&stream_id) {
                actor.pending_body.push_back((chunk, more_body));
            }
            self.flush_stream_body(stream_id).await?;
        }
        Ok(())
    }

    async fn write_header_block(&mut self, stream_id: u32, block: &[u8], end_stream: bool) -> Result<(), Error> {
        let max = self.peer_max_frame_size as usize;
        if block.len() <= max {
            let flags = frame::FLAG_END_HEADERS | if end_stream { frame::FLAG_END_STREAM } else { 0 };
            self.write_frame_timed(Kind::Headers, flags, stream_id, block).await?;
            return Ok(());
        }
        let (first, rest) = block.split_at(max);
        let flags = if end_stream { frame::FLAG_END_STREAM } else { 0 };
        self.write_frame_timed(Kind::Headers, flags, stream_id, first).await?;
        let mut rest = rest;
        while rest.len() > max {
            let (chunk, tail) = rest.split_at(max);
            self.write_frame_timed(Kind::Continuation, 0, stream_id, chunk).await?;
            rest = tail;
        }
        self.write_frame_timed(Kind::Continuation, frame::FLAG_END_HEADERS, stream_id, rest)
            .await
    }

    /// Send as much of `stream_id`'s pending body as the connection and
    /// stream send windows currently allow, respecting the peer's
    /// `MAX_FRAME_SIZE`. Anything left over stays queued until the next
    /// `WINDOW_UPDATE` or `SETTINGS` change calls this again.
    async fn flush_stream_body(&mut self, stream_id: u32) -> Result<(), Error> {
        loop {
            let Some(actor) = self.streams.get_mut(&stream_id) else {
                return Ok(());
            };
            let Some((chunk, more_body)) = actor.pending_body.pop_front() else {
                return Ok(());
            };

            let conn_avail = self.conn_send_window.available().max(0) as usize;
            let stream_avail = actor.stream.send_window.available().max(0) as usize;
            let sendable = chunk.len().min(conn_avail).min(stream_avail).min(self.peer_max_frame_size as usize);

            if sendable == 0 && !chunk.is_empty() {
                actor.pending_body.push_front((chunk, more_body));
                return Ok(());
            }

            let (head, tail) = chunk.split_at(sendable);
            let end_stream = tail.is_empty() && !more_body;
            let flags = if end_stream { frame::FLAG_END_STREAM } else { 0 };
            self.write_frame_timed(Kind::Data, flags, stream_id, head).await?;

            let tail = Bytes::copy_from_slice(tail);
            self.conn_send_window.consume(sendable);
            if let Some(actor) = self.streams.get_mut(&stream_id) {
                actor.stream.send_window.consume(sendable);
                if end_stream {
                    actor.stream.state.send_close()?;
                } else if !tail.is_empty() {
                    actor.pending_body.push_front((tail, more_body));
                }
            }
        }
    }

    async fn write_frame_timed(&mut self, kind: Kind, flags: u8, stream_id: u32, payload: &[u8]) -> Result<(), Error> {
        let fut = frame::write_frame(&mut self.transport, kind, flags, stream_id, payload);
        match self.write_timeout {
            Some(t) => tokio::time::timeout(t, fut).await.map_err(|_| Error::write_timeout())?,
            None => fut.await,
        }
    }

    async fn reset_stream(&mut self, stream_id: u32, reason: Reason) -> Result<(), Error> {
        if let Some(mut actor) = self.streams.remove(&stream_id) {
            actor.stream.state.force_close();
            tracing::debug!(stream_id, "h2 stream closed");
        }
        self.write_frame_timed(Kind::RstStream, 0, stream_id, &frame::rst_stream_payload(reason))
            .await
    }

    async fn handle_frame(&mut self, raw: frame::RawFrame) -> Result<(), Error> {
        match raw.kind {
            Kind::Settings => self.handle_settings(raw).await?,
            Kind::WindowUpdate => self.handle_window_update(raw).await?,
            Kind::Headers => self.handle_headers(raw).await?,
            Kind::Continuation => self.handle_continuation(raw).await?,
            Kind::Data => self.handle_data(raw).await?,
            Kind::RstStream => self.handle_rst_stream(raw),
            Kind::GoAway => self.handle_goaway(raw),
            Kind::Ping => self.handle_ping(raw).await?,
            Kind::Priority | Kind::PushPromise | Kind::Unknown => {}
        }
        Ok(())
    }

    async fn handle_settings(&mut self, raw: frame::RawFrame) -> Result<(), Error> {
        if raw.flags & frame::FLAG_ACK != 0 {
            return Ok(());
        }
        let pairs = frame::parse_settings(&raw.payload)?;
        let mut window_delta = 0i64;
        for (id, value) in pairs {
            match id {
                frame::SETTINGS_INITIAL_WINDOW_SIZE => {
                    window_delta = i64::from(value) - i64::from(self.peer_initial_window_size);
                    self.peer_initial_window_size = value;
                }
                frame::SETTINGS_MAX_FRAME_SIZE => self.peer_max_frame_size = value,
                frame::SETTINGS_HEADER_TABLE_SIZE => {
                    // We never emit dynamic-table insertions; nothing to resize.
                }
                _ => {}
            }
        }
        if window_delta != 0 {
            for actor in self.streams.values_mut() {
                actor.stream.send_window.apply_initial_window_delta(window_delta);
            }
        }
        self.write_frame_timed(Kind::Settings, frame::FLAG_ACK, 0, &[]).await?;
        let ids: Vec<u32> = self.streams.keys().copied().collect();
        for id in ids {
            self.flush_stream_body(id).await?;
        }
        Ok(())
    }

    async fn handle_window_update(&mut self, raw: frame::RawFrame) -> Result<(), Error> {
        let increment = frame::parse_window_update(&raw.payload)?;
        if raw.stream_id == 0 {
            self.conn_send_window.credit(increment);
            let ids: Vec<u32> = self.streams.keys().copied().collect();
            for id in ids {
                self.flush_stream_body(id).await?;
            }
        } else if let Some(actor) = self.streams.get_mut(&raw.stream_id) {
            actor.stream.send_window.credit(increment);
            self.flush_stream_body(raw.stream_id).await?;
        }
        Ok(())
    }

    async fn handle_headers(&mut self, raw: frame::RawFrame) -> Result<(), Error> {
        let Some(actor) = self.streams.get_mut(&raw.stream_id) else {
            return Ok(());
        };
        actor.header_block.extend_from_slice(&raw.payload);
        let end_stream = raw.flags & frame::FLAG_END_STREAM != 0;
        if raw.flags & frame::FLAG_END_HEADERS != 0 {
            self.deliver_headers(raw.stream_id, end_stream).await?;
        } else if end_stream {
            // END_STREAM with header continuation pending; remember it.
            self.streams.get_mut(&raw.stream_id).unwrap().stream.state.recv_close().ok();
        }
        Ok(())
    }

    async fn handle_continuation(&mut self, raw: frame::RawFrame) -> Result<(), Error> {
        let Some(actor) = self.streams.get_mut(&raw.stream_id) else {
            return Ok(());
        };
        actor.header_block.extend_from_slice(&raw.payload);
        if raw.flags & frame::FLAG_END_HEADERS != 0 {
            let end_stream = matches!(actor.stream.state, State::Open { remote_closed: true, .. } | State::Closed);
            self.deliver_headers(raw.stream_id, end_stream).await?;
        }
        Ok(())
    }

    async fn deliver_headers(&mut self, stream_id: u32, end_stream: bool) -> Result<(), Error> {
        let Some(actor) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        let block = std::mem::take(&mut actor.header_block);
        let fields = self.decoder.decode(&block)?;
        let (status, headers) = hpack::response_from_fields(fields)?;
        let Some(actor) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        let _ = actor.events.send(Message::Response {
            status,
            headers,
            more_body: !end_stream,
            stream_id: Some(stream_id),
            http_version: HttpVersion::H2,
        });
        if end_stream {
            actor.stream.state.recv_close()?;
            if actor.stream.state.is_closed() {
                tracing::debug!(stream_id, "h2 stream closed");
                self.streams.remove(&stream_id);
            }
        }
        Ok(())
    }

    async fn handle_data(&mut self, raw: frame::RawFrame) -> Result<(), Error> {
        let len = raw.payload.len() as u32;
        self.conn_recv_window.consume(len as usize);
        let end_stream = raw.flags & frame::FLAG_END_STREAM != 0;

        let mut closed = false;
        if let Some(actor) = self.streams.get_mut(&raw.stream_id) {
            actor.stream.recv_window.consume(len as usize);
            let _ = actor.events.send(Message::ResponseBody {
                body: raw.payload,
                more_body: !end_stream,
                stream_id: Some(raw.stream_id),
            });
            if end_stream {
                actor.stream.state.recv_close()?;
                closed = actor.stream.state.is_closed();
            }
        }
        if closed {
            tracing::debug!(stream_id = raw.stream_id, "h2 stream closed");
            self.streams.remove(&raw.stream_id);
        }

        // Replenish both windows eagerly; a byte-accurate credit scheme
        // is not worth the complexity for a client with no backpressure
        // signal from its own consumer.
        if len > 0 {
            self.conn_recv_window.credit(len);
            self.write_frame_timed(Kind::WindowUpdate, 0, 0, &frame::window_update_payload(len)).await?;
            if let Some(actor) = self.streams.get_mut(&raw.stream_id) {
                actor.stream.recv_window.credit(len);
                self.write_frame_timed(Kind::WindowUpdate, 0, raw.stream_id, &frame::window_update_payload(len))
                    .await?;
            }
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, raw: frame::RawFrame) {
        if let Some(mut actor) = self.streams.remove(&raw.stream_id) {
            actor.stream.state.force_close();
            let _ = actor.events.send(Message::Disconnect { stream_id: Some(raw.stream_id) });
        }
    }

    fn handle_goaway(&mut self, _raw: frame::RawFrame) {
        // REDESIGN FLAG (spec.md §9): every live stream is failed rather
        // than left to finish, and no further streams are accepted on
        // this connection. Dropping each stream's event sender turns its
        // pending/future `receive()` into a `server_disconnected` error.
        tracing::warn!(active_streams = self.streams.len(), "received GOAWAY, failing active streams");
        self.goaway_received = true;
        self.streams.clear();
    }

    async fn handle_ping(&mut self, raw: frame::RawFrame) -> Result<(), Error> {
        if raw.flags & frame::FLAG_ACK != 0 {
            return Ok(());
        }
        self.write_frame_timed(Kind::Ping, frame::FLAG_ACK, 0, &raw.payload).await
    }
}
