//! HTTP/2 frame header, kinds, and read/write over an async transport.
//!
//! Grounded on `rama-http-core/src/h2/frame/mod.rs` (the `Frame` enum
//! shape) and `rama-http-core/src/h2/frame/settings.rs` (settings
//! flags/config layout), trimmed to the frame types this engine actually
//! emits or consumes: DATA, HEADERS, CONTINUATION, SETTINGS,
//! WINDOW_UPDATE, RST_STREAM, GOAWAY, PING. PRIORITY and PUSH_PROMISE are
//! accepted on the wire (so a conforming peer doesn't wedge the
//! connection) but never emitted, since push is disabled by local
//! settings (`spec.md` §4.3) and stream priority is out of this spec's
//! scope.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Error;

pub(crate) const FRAME_HEADER_LEN: usize = 9;
pub(crate) const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub(crate) const FLAG_END_STREAM: u8 = 0x1;
pub(crate) const FLAG_ACK: u8 = 0x1;
pub(crate) const FLAG_END_HEADERS: u8 = 0x4;
pub(crate) const FLAG_PADDED: u8 = 0x8;
pub(crate) const FLAG_PRIORITY: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
    Unknown,
}

impl From<u8> for Kind {
    fn from(b: u8) -> Self {
        match b {
            0x0 => Kind::Data,
            0x1 => Kind::Headers,
            0x2 => Kind::Priority,
            0x3 => Kind::RstStream,
            0x4 => Kind::Settings,
            0x5 => Kind::PushPromise,
            0x6 => Kind::Ping,
            0x7 => Kind::GoAway,
            0x8 => Kind::WindowUpdate,
            0x9 => Kind::Continuation,
            _ => Kind::Unknown,
        }
    }
}

/// A raw frame as read off the wire: header fields plus an unparsed
/// payload. Higher-level code interprets the payload per `kind`.
pub(crate) struct RawFrame {
    pub(crate) kind: Kind,
    pub(crate) flags: u8,
    pub(crate) stream_id: u32,
    pub(crate) payload: Bytes,
}

pub(crate) async fn read_frame<R: tokio::io::AsyncRead + Unpin>(
    io: &mut R,
    max_frame_size: u32,
) -> Result<RawFrame, Error> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    io.read_exact(&mut header)
        .await
        .map_err(|_| Error::server_disconnected())?;
    let length = u32::from_be_bytes([0, header[0], header[1], header[2]]);
    if length > max_frame_size {
        return Err(Error::protocol("frame exceeds MAX_FRAME_SIZE"));
    }
    let kind = Kind::from(header[3]);
    let flags = header[4];
    let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7fff_ffff;

    let mut payload = vec![0u8; length as usize];
    if length > 0 {
        io.read_exact(&mut payload)
            .await
            .map_err(|_| Error::server_disconnected())?;
    }

    Ok(RawFrame {
        kind,
        flags,
        stream_id,
        payload: Bytes::from(payload),
    })
}

pub(crate) async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    io: &mut W,
    kind: Kind,
    flags: u8,
    stream_id: u32,
    payload: &[u8],
) -> Result<(), Error> {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    let len = payload.len() as u32;
    buf.put_u8((len >> 16) as u8);
    buf.put_u8((len >> 8) as u8);
    buf.put_u8(len as u8);
    buf.put_u8(kind as u8);
    buf.put_u8(flags);
    buf.put_u32(stream_id & 0x7fff_ffff);
    buf.put_slice(payload);
    io.write_all(&buf).await.map_err(Error::io)?;
    io.flush().await.map_err(Error::io)?;
    Ok(())
}

/// Encode a `WINDOW_UPDATE` payload (31-bit increment).
pub(crate) fn window_update_payload(increment: u32) -> [u8; 4] {
    (increment & 0x7fff_ffff).to_be_bytes()
}

pub(crate) fn parse_window_update(payload: &[u8]) -> Result<u32, Error> {
    if payload.len() != 4 {
        return Err(Error::protocol("malformed WINDOW_UPDATE"));
    }
    let mut b = payload;
    Ok(b.get_u32() & 0x7fff_ffff)
}

/// An RST_STREAM / GOAWAY error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reason(pub(crate) u32);

impl Reason {
    pub(crate) const NO_ERROR: Reason = Reason(0x0);
    pub(crate) const CANCEL: Reason = Reason(0x8);
}

pub(crate) fn rst_stream_payload(reason: Reason) -> [u8; 4] {
    reason.0.to_be_bytes()
}

pub(crate) fn goaway_payload(last_stream_id: u32, reason: Reason) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
    buf[4..].copy_from_slice(&reason.0.to_be_bytes());
    buf
}

/// A decoded SETTINGS frame: raw `(id, value)` pairs, interpreted by the
/// caller. `id` values follow RFC 7540 §11.3.
pub(crate) fn parse_settings(payload: &[u8]) -> Result<Vec<(u16, u32)>, Error> {
    if payload.len() % 6 != 0 {
        return Err(Error::protocol("malformed SETTINGS frame"));
    }
    let mut out = Vec::with_capacity(payload.len() / 6);
    let mut chunks = payload.chunks_exact(6);
    for chunk in &mut chunks {
        let id = u16::from_be_bytes([chunk[0], chunk[1]]);
        let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
        out.push((id, value));
    }
    Ok(out)
}

pub(crate) fn encode_settings(pairs: &[(u16, u32)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(pairs.len() * 6);
    for (id, value) in pairs {
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&value.to_be_bytes());
    }
    buf
}

pub(crate) const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub(crate) const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub(crate) const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub(crate) const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub(crate) const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub(crate) const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

pub(crate) const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub(crate) const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
