//! Message bodies: buffered, streamed, or both.
//!
//! A streamed request body is teed into a replay buffer as it flows to the
//! first origin attempt. Once the final chunk has been observed (and the
//! buffer stayed under its byte limit) the body is replayable: a retry resets
//! the reader and sends the identical buffered chunks again.
//!
//! ```text
//! source ──► TeeStream ──► attempt 1
//!              │
//!              ▼
//!          BodyBuffer ──► reset_reader ──► attempt 2..N
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

/// Stream of body chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, BodyError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BodyError {
    #[error("body read failed: {0}")]
    Read(String),

    #[error("body was partially sent and cannot be replayed")]
    NotReplayable,

    #[error("body reader must be reset before it is read again")]
    ReaderNotReset,
}

#[derive(Debug, Default)]
struct BodyBuffer {
    chunks: Vec<Bytes>,
    /// Bytes observed so far, including any not kept after truncation.
    len: usize,
    complete: bool,
    truncated: bool,
    failed: bool,
    /// Declared length; reaching it completes the body even if the consumer
    /// stops polling before end of stream.
    expected: Option<usize>,
}

impl BodyBuffer {
    fn record(&mut self, chunk: &Bytes, max_buffered: usize) {
        self.len += chunk.len();
        if self.expected.is_some_and(|expected| self.len >= expected) {
            self.complete = true;
        }
        if self.truncated {
            return;
        }
        if self.len > max_buffered {
            self.truncated = true;
            self.chunks = Vec::new();
            return;
        }
        self.chunks.push(chunk.clone());
    }
}

fn lock(buffer: &Mutex<BodyBuffer>) -> MutexGuard<'_, BodyBuffer> {
    buffer.lock().unwrap_or_else(|e| e.into_inner())
}

/// A request or response body.
pub struct Body {
    buffer: Arc<Mutex<BodyBuffer>>,
    source: Mutex<Option<BodyStream>>,
    source_taken: bool,
    reader_at_start: bool,
    max_buffered: usize,
}

impl Body {
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// A fully buffered body.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let mut buffer = BodyBuffer {
            len: bytes.len(),
            complete: true,
            ..Default::default()
        };
        if !bytes.is_empty() {
            buffer.chunks.push(bytes);
        }
        Self {
            buffer: Arc::new(Mutex::new(buffer)),
            source: Mutex::new(None),
            source_taken: false,
            reader_at_start: true,
            max_buffered: usize::MAX,
        }
    }

    /// A streamed body. At most `max_buffered` bytes are kept for replay.
    pub fn from_stream(source: BodyStream, max_buffered: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(BodyBuffer::default())),
            source: Mutex::new(Some(source)),
            source_taken: false,
            reader_at_start: true,
            max_buffered,
        }
    }

    /// Declare the body length (from Content-Length).
    pub fn with_expected_len(self, len: usize) -> Self {
        lock(&self.buffer).expected = Some(len);
        self
    }

    /// Every chunk of the body has been observed.
    pub fn is_complete(&self) -> bool {
        lock(&self.buffer).complete
    }

    /// The whole body is buffered and can be sent again unchanged.
    pub fn is_replayable(&self) -> bool {
        let buffer = lock(&self.buffer);
        buffer.complete && !buffer.truncated && !buffer.failed
    }

    /// Bytes observed so far.
    pub fn len(&self) -> usize {
        lock(&self.buffer).len
    }

    /// The live source has been handed to a consumer.
    pub fn is_source_taken(&self) -> bool {
        self.source_taken
    }

    pub fn is_empty(&self) -> bool {
        self.is_complete() && self.len() == 0
    }

    /// Chunks currently held in the replay buffer.
    pub fn buffered_chunk_count(&self) -> usize {
        lock(&self.buffer).chunks.len()
    }

    /// The full body, if it is buffered.
    pub fn bytes(&self) -> Option<Bytes> {
        let buffer = lock(&self.buffer);
        if !(buffer.complete && !buffer.truncated) {
            return None;
        }
        Some(concat(&buffer.chunks))
    }

    /// Read the rest of a stream that nothing has started consuming yet, up
    /// to `max_buffered` bytes. A larger body stops at the limit with the
    /// unread remainder left in place, so it can still be sent once but is
    /// never replayable. Has no effect on bodies that are buffered or already
    /// handed out.
    pub async fn buffer_remaining(&mut self) -> Result<(), BodyError> {
        if self.source_taken {
            return Ok(());
        }
        let source = self
            .source
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut source) = source else {
            return Ok(());
        };

        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(chunk) => {
                    let mut buffer = lock(&self.buffer);
                    if buffer.len + chunk.len() > self.max_buffered {
                        drop(buffer);
                        let rest = stream::once(async move { Ok(chunk) }).chain(source).boxed();
                        *self.source.get_mut().unwrap_or_else(|e| e.into_inner()) = Some(rest);
                        return Ok(());
                    }
                    buffer.len += chunk.len();
                    buffer.chunks.push(chunk);
                }
                Err(e) => {
                    lock(&self.buffer).failed = true;
                    return Err(e);
                }
            }
        }
        lock(&self.buffer).complete = true;
        Ok(())
    }

    /// Stream the body to an origin. The first call tees a streamed source
    /// into the replay buffer; later calls need `reset_reader` first.
    pub fn take_outbound(&mut self) -> Result<BodyStream, BodyError> {
        if !self.reader_at_start {
            return Err(BodyError::ReaderNotReset);
        }
        if self.source_taken && !self.is_replayable() {
            return Err(BodyError::NotReplayable);
        }
        self.reader_at_start = false;

        let buffered: Vec<Result<Bytes, BodyError>> =
            lock(&self.buffer).chunks.iter().cloned().map(Ok).collect();
        let replay = stream::iter(buffered);

        let source = self
            .source
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match source {
            Some(inner) => {
                self.source_taken = true;
                let tee = TeeStream {
                    inner,
                    buffer: Arc::clone(&self.buffer),
                    max_buffered: self.max_buffered,
                };
                Ok(replay.chain(tee).boxed())
            }
            None => Ok(replay.boxed()),
        }
    }

    /// Rewind to the start of the buffered body for another attempt.
    pub fn reset_reader(&mut self) -> Result<(), BodyError> {
        if self.source_taken && !self.is_replayable() {
            return Err(BodyError::NotReplayable);
        }
        self.reader_at_start = true;
        Ok(())
    }

    /// Consume the body as a stream (buffered chunks, then any unread source).
    pub fn into_stream(self) -> BodyStream {
        let buffered: Vec<Result<Bytes, BodyError>> =
            lock(&self.buffer).chunks.iter().cloned().map(Ok).collect();
        let replay = stream::iter(buffered);
        let source = self.source.into_inner().unwrap_or_else(|e| e.into_inner());
        match source {
            Some(inner) => replay.chain(inner).boxed(),
            None => replay.boxed(),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::from_bytes(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::from_bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::from_bytes(Bytes::from(s))
    }
}

/// Copies the buffered snapshot only; an unread source stays with the original.
impl Clone for Body {
    fn clone(&self) -> Self {
        let buffer = lock(&self.buffer);
        let snapshot = BodyBuffer {
            chunks: buffer.chunks.clone(),
            len: buffer.len,
            complete: buffer.complete && !buffer.truncated,
            truncated: buffer.truncated,
            failed: buffer.failed,
            expected: buffer.expected,
        };
        Self {
            buffer: Arc::new(Mutex::new(snapshot)),
            source: Mutex::new(None),
            source_taken: false,
            reader_at_start: true,
            max_buffered: self.max_buffered,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = lock(&self.buffer);
        f.debug_struct("Body")
            .field("len", &buffer.len)
            .field("chunks", &buffer.chunks.len())
            .field("complete", &buffer.complete)
            .field("truncated", &buffer.truncated)
            .field("source_taken", &self.source_taken)
            .finish()
    }
}

fn concat(chunks: &[Bytes]) -> Bytes {
    match chunks {
        [] => Bytes::new(),
        [one] => one.clone(),
        many => {
            let mut out = BytesMut::with_capacity(many.iter().map(Bytes::len).sum());
            for chunk in many {
                out.extend_from_slice(chunk);
            }
            out.freeze()
        }
    }
}

/// Forwards chunks from the source while recording them for replay.
struct TeeStream {
    inner: BodyStream,
    buffer: Arc<Mutex<BodyBuffer>>,
    max_buffered: usize,
}

impl Stream for TeeStream {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                let max = self.max_buffered;
                lock(&self.buffer).record(chunk, max);
            }
            Poll::Ready(Some(Err(_))) => lock(&self.buffer).failed = true,
            Poll::Ready(None) => lock(&self.buffer).complete = true,
            Poll::Pending => {}
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(parts: &[&'static str]) -> BodyStream {
        let items: Vec<Result<Bytes, BodyError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        stream::iter(items).boxed()
    }

    async fn collect(stream: BodyStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        chunks.concat()
    }

    #[tokio::test]
    async fn test_replay_after_full_tee() {
        let mut body = Body::from_stream(chunked(&["Hello", " ", "There"]), 1024);
        assert!(!body.is_replayable());

        let first = collect(body.take_outbound().unwrap()).await;
        assert_eq!(first, b"Hello There");
        assert!(body.is_replayable());

        assert!(matches!(body.take_outbound(), Err(BodyError::ReaderNotReset)));
        body.reset_reader().unwrap();
        let second = collect(body.take_outbound().unwrap()).await;
        assert_eq!(second, b"Hello There");
        assert_eq!(body.bytes().unwrap(), Bytes::from_static(b"Hello There"));
    }

    #[tokio::test]
    async fn test_partial_stream_is_not_replayable() {
        let mut body = Body::from_stream(chunked(&["a", "b", "c"]), 1024);
        let mut out = body.take_outbound().unwrap();
        let _ = out.next().await;
        drop(out);

        assert!(!body.is_complete());
        assert!(!body.is_replayable());
        assert!(matches!(body.reset_reader(), Err(BodyError::NotReplayable)));
    }

    #[tokio::test]
    async fn test_oversized_body_is_not_replayable() {
        let mut body = Body::from_stream(chunked(&["0123456789", "0123456789"]), 15);
        let sent = collect(body.take_outbound().unwrap()).await;
        assert_eq!(sent.len(), 20);
        assert!(body.is_complete());
        assert!(!body.is_replayable());
        assert_eq!(body.buffered_chunk_count(), 0);
        assert_eq!(body.len(), 20);
    }

    #[tokio::test]
    async fn test_declared_length_completes_without_end_of_stream() {
        let mut body = Body::from_stream(chunked(&["Hello", " There", "ignored"]), 1024)
            .with_expected_len(11);
        let mut out = body.take_outbound().unwrap();
        let _ = out.next().await;
        assert!(!body.is_complete());
        let _ = out.next().await;
        drop(out);

        assert!(body.is_replayable());
        body.reset_reader().unwrap();
        assert_eq!(collect(body.take_outbound().unwrap()).await, b"Hello There");
    }

    #[tokio::test]
    async fn test_buffer_remaining_before_send() {
        let mut body = Body::from_stream(chunked(&["x", "y"]), 2);
        body.buffer_remaining().await.unwrap();
        assert!(body.is_replayable());
        assert_eq!(body.bytes().unwrap(), Bytes::from_static(b"xy"));
    }

    #[tokio::test]
    async fn test_buffer_remaining_stops_at_limit() {
        let mut body = Body::from_stream(chunked(&["0123", "4567", "89"]), 5);
        body.buffer_remaining().await.unwrap();
        assert!(!body.is_replayable());
        assert!(!body.is_source_taken());
        assert_eq!(body.len(), 4);
        assert_eq!(body.buffered_chunk_count(), 1);

        // The body still goes out whole once, then cannot be replayed.
        let sent = collect(body.take_outbound().unwrap()).await;
        assert_eq!(sent, b"0123456789");
        assert!(body.is_complete());
        assert!(!body.is_replayable());
        assert!(matches!(body.reset_reader(), Err(BodyError::NotReplayable)));
    }

    #[tokio::test]
    async fn test_source_error_marks_failed() {
        let items: Vec<Result<Bytes, BodyError>> = vec![
            Ok(Bytes::from_static(b"a")),
            Err(BodyError::Read("reset".into())),
        ];
        let mut body = Body::from_stream(stream::iter(items).boxed(), 1024);
        let results: Vec<_> = body.take_outbound().unwrap().collect().await;
        assert!(results[1].is_err());
        assert!(!body.is_replayable());
    }

    #[tokio::test]
    async fn test_clone_copies_buffered_snapshot() {
        let body = Body::from_bytes("payload");
        let copy = body.clone();
        assert!(copy.is_replayable());
        assert_eq!(collect(copy.into_stream()).await, b"payload");

        let streamed = Body::from_stream(chunked(&["z"]), 1024);
        let copy = streamed.clone();
        assert!(!copy.is_complete());
        assert_eq!(collect(streamed.into_stream()).await, b"z");
    }
}
