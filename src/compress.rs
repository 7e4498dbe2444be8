//! Body (de)compression for [`CompressionMiddleware`](crate::middleware::CompressionMiddleware).
//!
//! Bridges the crate's `Stream<Item = Result<Bytes, Error>>` body
//! abstraction to `async-compression`'s `AsyncBufRead`-based codecs via
//! `tokio_util::io::{StreamReader, ReaderStream}`, the same adapter the
//! rest of the `rama`/`tokio` ecosystem uses to cross that boundary.

use async_compression::tokio::bufread::{DeflateDecoder, DeflateEncoder, GzipDecoder, GzipEncoder};
use tokio::io::{AsyncBufRead, AsyncRead, BufReader};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::body::Body;
use crate::error::Error;

type DynBufRead = Box<dyn AsyncBufRead + Send + Unpin>;

fn body_to_reader(body: Body) -> DynBufRead {
    use futures_util::StreamExt;
    let mapped = body.map(|item| item.map_err(std::io::Error::other));
    Box::new(BufReader::new(StreamReader::new(mapped)))
}

fn reader_to_body(reader: impl AsyncRead + Send + Unpin + 'static) -> Body {
    use futures_util::StreamExt;
    Body::from_stream(ReaderStream::new(reader).map(|item| item.map_err(Error::io)))
}

/// Apply `encodings` outbound, left-to-right (the order they were listed
/// in `content-encoding`, each wrapping the previous stage's output).
pub(crate) fn compress_body(body: Body, encodings: &[String]) -> Body {
    let mut reader = body_to_reader(body);
    for encoding in encodings {
        reader = wrap_encoder(reader, encoding);
    }
    reader_to_body(reader)
}

/// Undo `encodings` inbound, right-to-left.
pub(crate) fn decompress_body(body: Body, encodings: &[String]) -> Body {
    let mut reader = body_to_reader(body);
    for encoding in encodings.iter().rev() {
        reader = wrap_decoder(reader, encoding);
    }
    reader_to_body(reader)
}

fn wrap_encoder(reader: DynBufRead, encoding: &str) -> DynBufRead {
    match encoding {
        "gzip" => Box::new(BufReader::new(GzipEncoder::new(reader))),
        "deflate" => Box::new(BufReader::new(DeflateEncoder::new(reader))),
        _ => reader,
    }
}

fn wrap_decoder(reader: DynBufRead, encoding: &str) -> DynBufRead {
    match encoding {
        "gzip" => Box::new(BufReader::new(GzipDecoder::new(reader))),
        "deflate" => Box::new(BufReader::new(DeflateDecoder::new(reader))),
        _ => reader,
    }
}
