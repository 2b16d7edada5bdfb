//! # Byte streams
//!
//! Rendered output is a stream of byte chunks that may end with a terminal
//! [`StreamError`]. A [`ByteStream`] is a reader over a shared, append-only
//! buffer, so teeing is cheap: every branch is an independent cursor over the
//! same chunks and observes the same terminal state.
//!
//! ```
//! use usecache_core::ByteStream;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let (mut writer, stream) = ByteStream::channel();
//! let branch = stream.tee();
//!
//! writer.push("Hello, ");
//! writer.push("world");
//! writer.finish();
//!
//! assert_eq!(stream.collect().await.unwrap(), "Hello, world");
//! assert_eq!(branch.collect().await.unwrap(), "Hello, world");
//! # });
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::StreamError;
use crate::signal::CacheReadGuard;
use crate::MemoryEstimator;

#[derive(Debug, Default)]
struct BufferState {
    chunks: Vec<Bytes>,
    end: Option<Result<(), StreamError>>,
}

#[derive(Debug, Default)]
struct SharedBuffer {
    state: Mutex<BufferState>,
    changed: Notify,
}

impl SharedBuffer {
    fn push(&self, chunk: Bytes) {
        {
            let mut state = self.state.lock();
            if state.end.is_some() {
                return;
            }
            state.chunks.push(chunk);
        }
        self.changed.notify_waiters();
    }

    fn close(&self, end: Result<(), StreamError>) {
        {
            let mut state = self.state.lock();
            if state.end.is_some() {
                return;
            }
            state.end = Some(end);
        }
        self.changed.notify_waiters();
    }
}

/// A teeable stream of rendered bytes.
#[derive(Debug)]
pub struct ByteStream {
    buffer: Arc<SharedBuffer>,
    position: usize,
    error_reported: bool,
    read_guard: Option<CacheReadGuard>,
}

impl ByteStream {
    /// Creates an open stream and the writer that feeds it.
    pub fn channel() -> (StreamWriter, ByteStream) {
        let buffer = Arc::new(SharedBuffer::default());
        let writer = StreamWriter {
            buffer: Arc::clone(&buffer),
            closed: false,
        };
        (writer, Self::reader(buffer))
    }

    /// Creates a finished stream holding a single chunk.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_chunks([bytes.into()])
    }

    /// Creates a finished stream from a sequence of chunks.
    pub fn from_chunks(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        Self::from_parts(chunks.into_iter().collect(), Ok(()))
    }

    /// Creates a finished stream from stored chunks and terminal state.
    pub fn from_parts(chunks: Vec<Bytes>, end: Result<(), StreamError>) -> Self {
        let buffer = SharedBuffer {
            state: Mutex::new(BufferState {
                chunks,
                end: Some(end),
            }),
            changed: Notify::new(),
        };
        Self::reader(Arc::new(buffer))
    }

    /// Creates a stream that only carries a terminal error.
    pub fn errored(error: StreamError) -> Self {
        Self::from_parts(Vec::new(), Err(error))
    }

    fn reader(buffer: Arc<SharedBuffer>) -> Self {
        Self {
            buffer,
            position: 0,
            error_reported: false,
            read_guard: None,
        }
    }

    /// Returns a new branch positioned where this one currently is.
    pub fn tee(&self) -> ByteStream {
        Self {
            buffer: Arc::clone(&self.buffer),
            position: self.position,
            error_reported: self.error_reported,
            read_guard: None,
        }
    }

    /// Attaches a cache read that ends once this branch is drained or dropped.
    pub fn track_read(mut self, guard: CacheReadGuard) -> Self {
        self.read_guard = Some(guard);
        self
    }

    /// Returns true once the producer has finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        self.buffer.state.lock().end.is_some()
    }

    /// Returns the next chunk, the terminal error once, or `None` at the end.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, StreamError>> {
        loop {
            let notified = self.buffer.changed.notified();
            {
                let state = self.buffer.state.lock();
                if let Some(chunk) = state.chunks.get(self.position) {
                    self.position += 1;
                    return Some(Ok(chunk.clone()));
                }
                match &state.end {
                    Some(Ok(())) => {
                        drop(state);
                        self.read_guard.take();
                        return None;
                    }
                    Some(Err(err)) => {
                        let err = err.clone();
                        drop(state);
                        self.read_guard.take();
                        if self.error_reported {
                            return None;
                        }
                        self.error_reported = true;
                        return Some(Err(err));
                    }
                    None => {}
                }
            }
            notified.await;
        }
    }

    /// Drains the stream into one contiguous buffer.
    pub async fn collect(mut self) -> Result<Bytes, StreamError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }

    /// Waits for the producer and returns every chunk plus the terminal state.
    ///
    /// Unlike [`ByteStream::collect`] this keeps going past an error so the
    /// error itself can be stored alongside the bytes.
    pub async fn drain(mut self) -> (Vec<Bytes>, Result<(), StreamError>) {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            match chunk {
                Ok(bytes) => chunks.push(bytes),
                Err(err) => return (chunks, Err(err)),
            }
        }
        (chunks, Ok(()))
    }

    /// Adapts this branch into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, StreamError>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_chunk().await.map(|item| (item, stream))
        })
    }

    /// Bytes buffered so far, shared by every branch.
    pub fn buffered_len(&self) -> usize {
        self.buffer
            .state
            .lock()
            .chunks
            .iter()
            .map(Bytes::len)
            .sum()
    }
}

impl Clone for ByteStream {
    fn clone(&self) -> Self {
        self.tee()
    }
}

impl From<Bytes> for ByteStream {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for ByteStream {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for ByteStream {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for ByteStream {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(text)
    }
}

impl MemoryEstimator for ByteStream {
    fn estimate_memory(&self) -> usize {
        std::mem::size_of::<Self>() + self.buffered_len()
    }
}

/// Producer side of [`ByteStream::channel`].
///
/// Dropping an unfinished writer ends the stream with [`StreamError::Aborted`],
/// so readers never wait on a producer that is gone.
#[derive(Debug)]
pub struct StreamWriter {
    buffer: Arc<SharedBuffer>,
    closed: bool,
}

impl StreamWriter {
    pub fn push(&mut self, chunk: impl Into<Bytes>) {
        self.buffer.push(chunk.into());
    }

    pub fn finish(mut self) {
        self.closed = true;
        self.buffer.close(Ok(()));
    }

    pub fn fail(mut self, error: StreamError) {
        self.closed = true;
        self.buffer.close(Err(error));
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if !self.closed {
            self.buffer.close(Err(StreamError::Aborted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::CacheSignal;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_branches_created_before_data_see_everything() {
        let (mut writer, stream) = ByteStream::channel();
        let branches: Vec<ByteStream> = (0..4).map(|_| stream.tee()).collect();

        let producer = tokio::spawn(async move {
            for part in ["a", "b", "c"] {
                writer.push(part);
                tokio::task::yield_now().await;
            }
            writer.finish();
        });

        let mut results = Vec::new();
        for branch in branches {
            results.push(branch.collect().await.unwrap());
        }
        producer.await.unwrap();

        assert!(results.iter().all(|r| r == "abc"));
        assert_eq!(stream.collect().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_tee_keeps_position() {
        let mut stream = ByteStream::from_chunks([Bytes::from("x"), Bytes::from("y")]);
        assert_eq!(stream.next_chunk().await.unwrap().unwrap(), "x");
        let branch = stream.tee();
        assert_eq!(branch.collect().await.unwrap(), "y");
    }

    #[tokio::test]
    async fn test_error_is_replayed_on_every_branch() {
        let (mut writer, stream) = ByteStream::channel();
        writer.push("partial");
        writer.fail(StreamError::Computation("boom".to_string()));

        let branch = stream.tee();
        let expected = Err(StreamError::Computation("boom".to_string()));
        assert_eq!(stream.collect().await, expected);
        assert_eq!(branch.collect().await, expected);
    }

    #[tokio::test]
    async fn test_dropped_writer_aborts_stream() {
        let (writer, stream) = ByteStream::channel();
        drop(writer);
        assert_eq!(stream.collect().await, Err(StreamError::Aborted));
    }

    #[tokio::test]
    async fn test_drain_keeps_chunks_before_error() {
        let (mut writer, stream) = ByteStream::channel();
        writer.push("one");
        writer.fail(StreamError::Aborted);
        let (chunks, end) = stream.drain().await;
        assert_eq!(chunks, vec![Bytes::from("one")]);
        assert_eq!(end, Err(StreamError::Aborted));
    }

    #[tokio::test]
    async fn test_tracked_read_ends_when_drained() {
        let signal = CacheSignal::new();
        let stream = ByteStream::from_bytes("data").track_read(signal.begin_read());
        assert_eq!(signal.pending_reads(), 1);
        stream.collect().await.unwrap();
        assert_eq!(signal.pending_reads(), 0);
    }

    #[tokio::test]
    async fn test_tracked_read_ends_when_dropped() {
        let signal = CacheSignal::new();
        let (_writer, stream) = ByteStream::channel();
        let stream = stream.track_read(signal.begin_read());
        drop(stream);
        assert_eq!(signal.pending_reads(), 0);
    }

    #[tokio::test]
    async fn test_into_stream_yields_chunks() {
        let stream = ByteStream::from_chunks([Bytes::from("1"), Bytes::from("2")]);
        let items: Vec<_> = stream.into_stream().collect().await;
        assert_eq!(items, vec![Ok(Bytes::from("1")), Ok(Bytes::from("2"))]);
    }
}
