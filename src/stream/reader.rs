use super::chunk::StreamChunk;
use crate::core::LLMError;
use async_stream::try_stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use log::debug;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::fmt::Display;

const DATA_PREFIX: &str = "data: ";

/// Error body returned by the relay for failed requests.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Reassembles [`StreamChunk`]s from an SSE byte stream.
pub struct StreamReader {
    body: BoxStream<'static, Result<Bytes, LLMError>>,
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader").finish_non_exhaustive()
    }
}

impl StreamReader {
    /// Wraps a response body. Fails when the response declares an empty body.
    pub fn new(response: Response) -> Result<Self, LLMError> {
        if response.content_length() == Some(0) {
            return Err(LLMError::StreamError("Response has no body".to_string()));
        }
        let body = response.bytes_stream().map(|chunk| chunk.map_err(LLMError::from));
        Ok(Self {
            body: body.boxed(),
        })
    }

    /// Wraps any byte stream.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display,
    {
        let body = stream.map(|chunk| chunk.map_err(|e| LLMError::StreamError(e.to_string())));
        Self {
            body: body.boxed(),
        }
    }

    /// Sends `request` and wraps the response body.
    ///
    /// A non-success status is turned into an error from the JSON body's
    /// `error` field, falling back to a generic message.
    pub async fn from_fetch(request: RequestBuilder) -> Result<Self, LLMError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| "Request failed".to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED => {
                    LLMError::Authentication(format!("{message} ({status})"))
                }
                _ => LLMError::ApiError(format!("{message} ({status})")),
            });
        }
        Self::new(response)
    }

    /// Yields chunks until a `done` frame or the end of the body.
    ///
    /// Lines that are not `data: ` frames, and frames whose payload is not
    /// valid JSON, are skipped.
    pub fn read(self) -> impl Stream<Item = Result<StreamChunk, LLMError>> + Send {
        let mut body = self.body;
        try_stream! {
            let mut buffer: Vec<u8> = Vec::new();

            'outer: while let Some(bytes) = body.next().await {
                buffer.extend_from_slice(&bytes?);

                // '\n' never occurs inside a multi-byte UTF-8 sequence
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);

                    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            let done = chunk == StreamChunk::Done;
                            yield chunk;
                            if done {
                                break 'outer;
                            }
                        }
                        Err(e) => debug!("[StreamReader] skipping malformed frame: {e}"),
                    }
                }
            }
        }
    }
}
