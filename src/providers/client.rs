use crate::core::LLMError;
use crate::eventsource::{Event, EventSourceExt};
use async_stream::{stream, try_stream};
use futures::{Stream, StreamExt};
use log::debug;
use reqwest::{Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use super::adapter::ChunkStream;
use super::types::shared::ErrorResponse;
use super::types::{ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, GenerationArgs};

const STREAM_SENTINEL: &str = "[DONE]";

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint.
///
/// Both adapter variants sit on top of this; they differ only in base URL,
/// credential and how the model id is spelled.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl ChatCompletionsClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            client,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{base}/chat/completions", base = self.base_url)
    }

    /// Posts a chat completion request and checks the response status.
    pub async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest<'_>,
    ) -> Result<Response, LLMError> {
        let mut builder = self.client.post(self.endpoint()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if request.stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.send().await.map_err(LLMError::from)?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(LLMError::Authentication(
                "Invalid access token or unauthorized access (401)".to_string(),
            )),
            status => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                let message = serde_json::from_str::<ErrorResponse>(&error_text)
                    .map(|body| body.error.message().to_string())
                    .unwrap_or(error_text);
                Err(LLMError::ApiError(format!(
                    "API request failed with status {status}: {message}"
                )))
            }
        }
    }

    pub async fn complete(
        &self,
        model: &str,
        args: &GenerationArgs,
    ) -> Result<ChatCompletion, LLMError> {
        let request = ChatCompletionRequest::new(model, args, false);
        let response = self.create_chat_completion(&request).await?;
        let response_text = response
            .text()
            .await
            .map_err(|e| LLMError::ResponseFormat(format!("Failed to get response text: {e}")))?;
        serde_json::from_str(&response_text)
            .map_err(|e| LLMError::ResponseFormat(format!("Failed to parse completion: {e}")))
    }

    pub async fn complete_streaming(
        &self,
        model: &str,
        args: &GenerationArgs,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, LLMError> {
        let request = ChatCompletionRequest::new(model, args, true);
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LLMError::Cancelled),
            response = self.create_chat_completion(&request) => response?,
        };

        Ok(until_cancelled(process_stream(response.events()), cancel.clone()).boxed())
    }
}

fn process_stream(
    mut stream: impl Stream<Item = Result<Event, reqwest::Error>> + Send + 'static + Unpin,
) -> impl Stream<Item = Result<ChatCompletionChunk, LLMError>> + Send + 'static {
    try_stream! {
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    if event.data == STREAM_SENTINEL {
                        break;
                    }
                    yield ChatCompletionChunk::try_from(event)?;
                }
                Err(e) => Err(LLMError::StreamError(e.to_string()))?,
            }
        }
    }
}

/// Ends `stream` with `LLMError::Cancelled` once `cancel` fires.
///
/// Dropping the inner stream drops the HTTP body, which aborts the request.
fn until_cancelled<S>(
    stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<ChatCompletionChunk, LLMError>> + Send + 'static
where
    S: Stream<Item = Result<ChatCompletionChunk, LLMError>> + Send + 'static,
{
    stream! {
        let mut stream = Box::pin(stream);
        loop {
            // `None` means the token fired
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };
            match next {
                Some(Some(item)) => {
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        break;
                    }
                }
                Some(None) => break,
                None => {
                    debug!("[ChatCompletions] stream cancelled");
                    yield Err(LLMError::Cancelled);
                    break;
                }
            }
        }
    }
}

impl TryFrom<Event> for ChatCompletionChunk {
    type Error = LLMError;

    fn try_from(event: Event) -> Result<Self, LLMError> {
        if event.data.is_empty() {
            return Err(LLMError::ResponseFormat("Empty data".to_string()));
        }
        serde_json::from_str(&event.data).map_err(|e| {
            // Gateways report mid-stream failures as an error envelope
            match serde_json::from_str::<ErrorResponse>(&event.data) {
                Ok(body) => LLMError::StreamError(body.error.message().to_string()),
                Err(_) => LLMError::ResponseFormat(format!("Invalid JSON: {e}")),
            }
        })
    }
}
