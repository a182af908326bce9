use super::chunk::StreamChunk;
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::debug;
use std::convert::Infallible;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Serializes [`StreamChunk`]s into an SSE byte stream.
///
/// Writes never fail: once the writer is closed, or the consumer has gone
/// away, frames are dropped silently.
pub struct StreamWriter {
    sender: Mutex<Option<UnboundedSender<Bytes>>>,
    consumer: CancellationToken,
}

/// The consuming half of a [`StreamWriter`]: an HTTP body of SSE frames.
pub struct SseBody {
    frames: UnboundedReceiverStream<Bytes>,
    _consumer: DropGuard,
}

impl StreamWriter {
    /// Creates a writer and the body it feeds.
    pub fn channel() -> (Self, SseBody) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let consumer = CancellationToken::new();
        let writer = Self {
            sender: Mutex::new(Some(sender)),
            consumer: consumer.clone(),
        };
        let body = SseBody {
            frames: UnboundedReceiverStream::new(receiver),
            _consumer: consumer.drop_guard(),
        };
        (writer, body)
    }

    /// Writes one frame. A terminal frame closes the stream.
    pub fn write(&self, chunk: &StreamChunk) {
        if chunk.is_terminal() {
            self.close_with(chunk);
            return;
        }
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = sender.as_ref() {
            if sender.send(Bytes::from(chunk.to_frame())).is_err() {
                debug!("[StreamWriter] consumer gone, dropping frame");
            }
        }
    }

    pub fn write_chunk(&self, content: impl Into<String>) {
        self.write(&StreamChunk::chunk(content));
    }

    pub fn write_error(&self, message: impl Into<String>) {
        self.write(&StreamChunk::error(message));
    }

    /// Writes the terminal `done` frame and closes the stream.
    pub fn end(&self) {
        self.close_with(&StreamChunk::Done);
    }

    /// Writes an `error` frame and closes the stream.
    pub fn error(&self, err: impl Display) {
        self.close_with(&StreamChunk::error(err.to_string()));
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Resolves once the body has been dropped, i.e. the client disconnected
    /// or the response finished.
    pub async fn closed(&self) {
        self.consumer.cancelled().await;
    }

    fn close_with(&self, last: &StreamChunk) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(Bytes::from(last.to_frame()));
        }
    }
}

impl Stream for SseBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames)
            .poll_next(cx)
            .map(|frame| frame.map(Ok))
    }
}

impl IntoResponse for SseBody {
    fn into_response(self) -> Response {
        (
            [
                (CONTENT_TYPE, "text/event-stream"),
                (CACHE_CONTROL, "no-cache"),
                (CONNECTION, "keep-alive"),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

/// Pumps `source` through a new writer on a background task.
///
/// Each item is mapped by `transform`; the stream ends with `done`, or with an
/// `error` frame at the first failed item.
pub fn stream_from<S, T, E, F>(mut source: S, transform: F) -> SseBody
where
    S: Stream<Item = Result<T, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
    T: Send + 'static,
    F: Fn(T) -> StreamChunk + Send + 'static,
{
    let (writer, body) = StreamWriter::channel();
    tokio::spawn(async move {
        while let Some(item) = source.next().await {
            match item {
                Ok(item) => {
                    writer.write(&transform(item));
                    if writer.is_closed() {
                        return;
                    }
                }
                Err(err) => {
                    writer.error(err);
                    return;
                }
            }
        }
        writer.end();
    });
    body
}
