//! A single-pass, cancellable byte-chunk stream.
//!
//! Request and response bodies are both represented by [`Body`]: a boxed,
//! lazy, finite sequence of [`Bytes`] chunks. It is deliberately not
//! restartable (see `spec.md` §3) — replaying a body is the caller's
//! concern, not the engine's.

use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;

use crate::error::Error;

/// One chunk (or terminal error) of a request or response body.
pub type BodyItem = Result<Bytes, Error>;

/// A boxed, single-pass stream of body chunks.
pub struct Body {
    inner: Pin<Box<dyn Stream<Item = BodyItem> + Send>>,
}

impl Body {
    /// Wrap any [`Stream`] of byte chunks as a [`Body`].
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = BodyItem> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A body consisting of exactly one in-memory chunk.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::from_stream(futures_util::stream::once(async move { Ok(bytes) }))
    }

    pub(crate) fn empty() -> Self {
        Self::from_stream(futures_util::stream::empty())
    }

    /// Pull the next chunk, or `None` at end of stream.
    pub async fn next(&mut self) -> Option<BodyItem> {
        futures_util::StreamExt::next(&mut self.inner).await
    }

    /// Drain the whole body into one contiguous buffer.
    pub async fn into_bytes(mut self) -> Result<Bytes, Error> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }

    /// Drain the whole body and decode it as text using the given encoding
    /// label. Only `"utf-8"` (the default used when no `charset` is present
    /// in `content-type`) is supported without an external decoding crate;
    /// any other label is accepted but decoded as UTF-8 with lossy
    /// replacement, since charset *transcoding* is outside this crate's
    /// scope (it consumes encodings as external collaborators, `spec.md`
    /// §1).
    pub async fn into_text(self, _encoding: &str) -> Result<String, Error> {
        let bytes = self.into_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Drain the whole body and decode it as JSON.
    pub async fn into_json<T: serde::de::DeserializeOwned>(self) -> Result<T, Error> {
        let bytes = self.into_bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::protocol(e))
    }
}

impl Stream for Body {
    type Item = BodyItem;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
