//! A minimal HPACK codec: RFC 7541 integer/string primitives and the
//! static table, used here for request/response header (de)compression.
//!
//! Huffman coding is intentionally not implemented (see `SPEC_FULL.md`
//! §4.3) — literals are always emitted as raw octets. This is valid wire
//! format (the Huffman bit is just unset) and any conforming HPACK
//! decoder on the peer side accepts it; we simply never produce or expect
//! compressed literals. The dynamic table is supported since peers are
//! free to reference it for the responses we must decode.

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::error::Error;

const STATIC_TABLE: &[(&str, &str)] = &[
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

const DEFAULT_DYNAMIC_TABLE_SIZE: usize = 4_096;

/// One header field, name and value as raw bytes — pseudo-headers and
/// regular headers alike, kept separate from `http::HeaderMap` until
/// assembly since the map can't hold `:method`/`:path`/etc.
#[derive(Debug, Clone)]
pub(crate) struct Field {
    pub(crate) name: Bytes,
    pub(crate) value: Bytes,
}

/// Encodes outbound header blocks. We never emit dynamic-table
/// insertions (see module docs), so there is no outbound table state to
/// track beyond the static table lookup itself.
pub(crate) struct Encoder {
    _private: (),
}

impl Encoder {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }

    /// Encode a full header block. Every field is emitted as "literal
    /// header field without indexing" with a literal (non-Huffman) name
    /// and value — simple, and always correct regardless of what the
    /// peer's dynamic table currently holds.
    pub(crate) fn encode(&mut self, fields: &[Field]) -> Bytes {
        let mut buf = BytesMut::new();
        for field in fields {
            if let Some(index) = find_static(&field.name, &field.value) {
                encode_integer(&mut buf, 0x80, 7, index as u64);
                continue;
            }
            // Literal without indexing, new name (0b0000_0000 prefix).
            buf.put_u8(0x00);
            encode_string(&mut buf, &field.name);
            encode_string(&mut buf, &field.value);
        }
        buf.freeze()
    }
}

/// Decoder state for the inbound direction.
pub(crate) struct Decoder {
    dynamic: Vec<(Bytes, Bytes)>,
    dynamic_size: usize,
    max_dynamic_size: usize,
}

impl Decoder {
    pub(crate) fn new() -> Self {
        Self {
            dynamic: Vec::new(),
            dynamic_size: 0,
            max_dynamic_size: DEFAULT_DYNAMIC_TABLE_SIZE,
        }
    }

    pub(crate) fn set_max_dynamic_size(&mut self, size: usize) {
        self.max_dynamic_size = size;
        self.evict_to_fit();
    }

    pub(crate) fn decode(&mut self, mut block: &[u8]) -> Result<Vec<Field>, Error> {
        let mut fields = Vec::new();
        while !block.is_empty() {
            let first = block[0];
            if first & 0x80 != 0 {
                let (index, rest) = decode_integer(block, 0x7f)?;
                block = rest;
                let (name, value) = self.lookup(index)?;
                fields.push(Field { name, value });
            } else if first & 0x40 != 0 {
                let (index, rest) = decode_integer(block, 0x3f)?;
                block = rest;
                let name = if index == 0 {
                    let (s, rest) = decode_string(block)?;
                    block = rest;
                    s
                } else {
                    self.lookup(index)?.0
                };
                let (value, rest) = decode_string(block)?;
                block = rest;
                self.insert_dynamic(name.clone(), value.clone());
                fields.push(Field { name, value });
            } else if first & 0x20 != 0 {
                let (size, rest) = decode_integer(block, 0x1f)?;
                block = rest;
                self.set_max_dynamic_size(size as usize);
            } else {
                // Literal without indexing (0x00 prefix) or never-indexed
                // (0x10 prefix): both decode identically for our purposes.
                let (index, rest) = decode_integer(block, 0x0f)?;
                block = rest;
                let name = if index == 0 {
                    let (s, rest) = decode_string(block)?;
                    block = rest;
                    s
                } else {
                    self.lookup(index)?.0
                };
                let (value, rest) = decode_string(block)?;
                block = rest;
                fields.push(Field { name, value });
            }
        }
        Ok(fields)
    }

    fn lookup(&self, index: u64) -> Result<(Bytes, Bytes), Error> {
        let index = index as usize;
        if index == 0 {
            return Err(Error::protocol("HPACK index 0 is invalid"));
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok((Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes())));
        }
        let dyn_index = index - STATIC_TABLE.len() - 1;
        self.dynamic
            .get(dyn_index)
            .cloned()
            .ok_or_else(|| Error::protocol("HPACK dynamic table index out of range"))
    }

    fn insert_dynamic(&mut self, name: Bytes, value: Bytes) {
        let entry_size = name.len() + value.len() + 32;
        self.dynamic.insert(0, (name, value));
        self.dynamic_size += entry_size;
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.dynamic_size > self.max_dynamic_size {
            match self.dynamic.pop() {
                Some((name, value)) => self.dynamic_size -= name.len() + value.len() + 32,
                None => break,
            }
        }
    }
}

fn find_static(name: &[u8], value: &[u8]) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|(n, v)| n.as_bytes() == name && v.as_bytes() == value)
        .map(|i| i + 1)
}

fn encode_integer(buf: &mut BytesMut, prefix_bits: u8, prefix_len: u8, mut value: u64) {
    let max_prefix = (1u64 << prefix_len) - 1;
    if value < max_prefix {
        buf.put_u8(prefix_bits | value as u8);
        return;
    }
    buf.put_u8(prefix_bits | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        buf.put_u8(((value % 128) | 0x80) as u8);
        value /= 128;
    }
    buf.put_u8(value as u8);
}

fn decode_integer(block: &[u8], prefix_mask: u8) -> Result<(u64, &[u8]), Error> {
    if block.is_empty() {
        return Err(Error::protocol("truncated HPACK integer"));
    }
    let mut value = (block[0] & prefix_mask) as u64;
    let mut rest = &block[1..];
    if value < prefix_mask as u64 {
        return Ok((value, rest));
    }
    let mut m = 0u32;
    loop {
        if rest.is_empty() {
            return Err(Error::protocol("truncated HPACK integer"));
        }
        let byte = rest[0];
        rest = &rest[1..];
        value += ((byte & 0x7f) as u64) << m;
        if byte & 0x80 == 0 {
            break;
        }
        m += 7;
    }
    Ok((value, rest))
}

fn encode_string(buf: &mut BytesMut, s: &[u8]) {
    encode_integer(buf, 0x00, 7, s.len() as u64);
    buf.put_slice(s);
}

fn decode_string(block: &[u8]) -> Result<(Bytes, &[u8]), Error> {
    if block.is_empty() {
        return Err(Error::protocol("truncated HPACK string"));
    }
    let huffman = block[0] & 0x80 != 0;
    let (len, rest) = decode_integer(block, 0x7f)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(Error::protocol("truncated HPACK string"));
    }
    if huffman {
        return Err(Error::protocol("Huffman-coded HPACK strings are not supported"));
    }
    let (data, rest) = rest.split_at(len);
    Ok((Bytes::copy_from_slice(data), rest))
}

/// Build the pseudo-header-prefixed field list for an outbound request.
pub(crate) fn request_fields(
    method: &Method,
    scheme: &str,
    authority: &str,
    path: &str,
    headers: &HeaderMap,
) -> Vec<Field> {
    let mut fields = vec![
        Field {
            name: Bytes::from_static(b":method"),
            value: Bytes::copy_from_slice(method.as_str().as_bytes()),
        },
        Field {
            name: Bytes::from_static(b":scheme"),
            value: Bytes::copy_from_slice(scheme.as_bytes()),
        },
        Field {
            name: Bytes::from_static(b":authority"),
            value: Bytes::copy_from_slice(authority.as_bytes()),
        },
        Field {
            name: Bytes::from_static(b":path"),
            value: Bytes::copy_from_slice(path.as_bytes()),
        },
    ];
    for (name, value) in headers {
        if name == http::header::HOST {
            continue;
        }
        fields.push(Field {
            name: Bytes::copy_from_slice(name.as_str().as_bytes()),
            value: Bytes::copy_from_slice(value.as_bytes()),
        });
    }
    fields
}

/// Split decoded fields into `(status, HeaderMap)`, stripping
/// pseudo-headers. `:status` must be present exactly once.
pub(crate) fn response_from_fields(fields: Vec<Field>) -> Result<(u16, HeaderMap), Error> {
    let mut status = None;
    let mut headers = HeaderMap::new();
    let mut seen_regular_header = false;
    for field in fields {
        if field.name.starts_with(b":") {
            if seen_regular_header {
                return Err(Error::protocol("pseudo-header after regular header"));
            }
            if field.name.as_ref() == b":status" {
                let text = std::str::from_utf8(&field.value)
                    .map_err(|_| Error::protocol("non-UTF8 :status"))?;
                status = Some(
                    text.parse::<u16>()
                        .map_err(|_| Error::protocol("malformed :status"))?,
                );
            }
            continue;
        }
        seen_regular_header = true;
        let name = HeaderName::from_bytes(&field.name).map_err(|_| Error::protocol("invalid header name"))?;
        let value = HeaderValue::from_bytes(&field.value).map_err(|_| Error::protocol("invalid header value"))?;
        headers.append(name, value);
    }
    let status = status.ok_or_else(|| Error::protocol("missing :status pseudo-header"))?;
    Ok((status, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip_small() {
        let mut buf = BytesMut::new();
        encode_integer(&mut buf, 0, 5, 10);
        let (value, rest) = decode_integer(&buf, 0x1f).unwrap();
        assert_eq!(value, 10);
        assert!(rest.is_empty());
    }

    #[test]
    fn integer_round_trip_large() {
        let mut buf = BytesMut::new();
        encode_integer(&mut buf, 0, 5, 1337);
        let (value, rest) = decode_integer(&buf, 0x1f).unwrap();
        assert_eq!(value, 1337);
        assert!(rest.is_empty());
    }

    #[test]
    fn static_table_hit_for_method_get() {
        assert_eq!(find_static(b":method", b"GET"), Some(2));
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut enc = Encoder::new();
        let fields = vec![
            Field {
                name: Bytes::from_static(b":method"),
                value: Bytes::from_static(b"GET"),
            },
            Field {
                name: Bytes::from_static(b"x-custom"),
                value: Bytes::from_static(b"value"),
            },
        ];
        let block = enc.encode(&fields);
        let mut dec = Decoder::new();
        let decoded = dec.decode(&block).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].value.as_ref(), b"GET");
        assert_eq!(decoded[1].name.as_ref(), b"x-custom");
    }
}
