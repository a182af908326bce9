//! Client for a running relay, with one credential refresh on a 401.

use crate::core::{GenerateRequest, GenerationOutput, LLMError};
use crate::stream::{StreamChunk, StreamReader};
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use log::{debug, info};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

const LOGIN_REQUIRED: &str = "Failed to connect to inference providers. Are you logged in?";

/// Supplies a fresh access token after the relay rejected the current one.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `None` when no new credential could be obtained.
    async fn refresh(&self) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

pub struct RelayClient {
    client: Client,
    base_url: String,
    credentials: Box<dyn CredentialSource>,
}

impl RelayClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        credentials: Box<dyn CredentialSource>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    /// Replaces the request's access token, or fails when none is available.
    async fn refresh_credential(&self, request: &mut GenerateRequest) -> Result<(), LLMError> {
        info!("Access token rejected, requesting a new one");
        let token = self
            .credentials
            .refresh()
            .await
            .ok_or_else(|| LLMError::Authentication(LOGIN_REQUIRED.to_string()))?;
        request.access_token = token;
        Ok(())
    }

    /// Streams a generation, calling `on_chunk` with the text received so far.
    ///
    /// Returns the full text. An authentication failure, either as a 401 or
    /// as an in-stream error mentioning it, is retried once with a refreshed
    /// credential.
    pub async fn generate_streaming<F>(
        &self,
        mut request: GenerateRequest,
        mut on_chunk: F,
        cancel: &CancellationToken,
    ) -> Result<String, LLMError>
    where
        F: FnMut(&str) + Send,
    {
        request.streaming = true;
        match self.stream_once(&request, &mut on_chunk, cancel).await {
            Err(e) if e.is_authentication() => {
                debug!("[RelayClient] streaming attempt failed: {e}");
                self.refresh_credential(&mut request).await?;
                self.stream_once(&request, &mut on_chunk, cancel).await
            }
            result => result,
        }
    }

    async fn stream_once<F>(
        &self,
        request: &GenerateRequest,
        on_chunk: &mut F,
        cancel: &CancellationToken,
    ) -> Result<String, LLMError>
    where
        F: FnMut(&str) + Send,
    {
        let reader =
            StreamReader::from_fetch(self.client.post(self.endpoint()).json(request)).await?;
        let chunks = reader.read();
        pin_mut!(chunks);

        let mut out = String::new();
        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LLMError::Cancelled),
                chunk = chunks.next() => chunk,
            };
            match chunk.transpose()? {
                Some(StreamChunk::Chunk {
                    content: Some(content),
                }) if !content.is_empty() => {
                    out.push_str(&content);
                    on_chunk(&out);
                }
                Some(StreamChunk::Error { error }) => {
                    return Err(LLMError::from_stream_message(
                        error.unwrap_or_else(|| "Stream error".to_string()),
                    ));
                }
                Some(_) => {}
                None => return Ok(out),
            }
        }
    }

    /// Requests a whole generation, retrying once after a 401.
    pub async fn generate(
        &self,
        mut request: GenerateRequest,
    ) -> Result<GenerationOutput, LLMError> {
        request.streaming = false;
        match self.generate_once(&request).await {
            Err(e) if e.is_authentication() => {
                self.refresh_credential(&mut request).await?;
                self.generate_once(&request).await
            }
            result => result,
        }
    }

    async fn generate_once(&self, request: &GenerateRequest) -> Result<GenerationOutput, LLMError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| LLMError::ResponseFormat(format!("Invalid generation response: {e}")));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| "Failed to generate response".to_string());
        Err(match status {
            StatusCode::UNAUTHORIZED => LLMError::Authentication(message),
            _ => LLMError::ApiError(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ModelDescriptor;
    use crate::providers::Message;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedToken {
        token: Option<&'static str>,
        refreshes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CredentialSource for FixedToken {
        async fn refresh(&self) -> Option<String> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.token.map(str::to_string)
        }
    }

    fn client(server: &MockServer, token: Option<&'static str>) -> (RelayClient, Arc<AtomicUsize>) {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let client = RelayClient::new(
            Client::new(),
            server.uri(),
            Box::new(FixedToken {
                token,
                refreshes: Arc::clone(&refreshes),
            }),
        );
        (client, refreshes)
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: ModelDescriptor {
                id: "Qwen/Qwen2.5-72B-Instruct".to_string(),
                ..Default::default()
            },
            messages: vec![Message::user("hi")],
            access_token: "hf_stale".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_retries_once_after_401() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"accessToken": "hf_stale"})))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "unauthorized"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"accessToken": "hf_fresh"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "Hello"},
                "completion_tokens": 2
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (client, refreshes) = client(&server, Some("hf_fresh"));

        let output = client.generate(request()).await.unwrap();
        assert_eq!(output.message.content(), "Hello");
        assert_eq!(output.completion_tokens, 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_401_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "still unauthorized"})))
            .expect(2)
            .mount(&server)
            .await;
        let (client, refreshes) = client(&server, Some("hf_fresh"));

        let err = client.generate(request()).await.unwrap_err();
        assert!(matches!(err, LLMError::Authentication(msg) if msg == "still unauthorized"));
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_asks_to_log_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let (client, _) = client(&server, None);

        let err = client.generate(request()).await.unwrap_err();
        assert!(matches!(err, LLMError::Authentication(msg) if msg == LOGIN_REQUIRED));
    }

    #[tokio::test]
    async fn test_server_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "No response from the model"})))
            .mount(&server)
            .await;
        let (client, refreshes) = client(&server, Some("hf_fresh"));

        let err = client.generate(request()).await.unwrap_err();
        assert!(matches!(err, LLMError::ApiError(msg) if msg == "No response from the model"));
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_streaming_reports_accumulated_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"streaming": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                concat!(
                    "data: {\"type\":\"chunk\",\"content\":\"Hel\"}\n\n",
                    "data: {\"type\":\"chunk\",\"content\":\"lo\"}\n\n",
                    "data: {\"type\":\"done\"}\n\n",
                ),
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        let (client, _) = client(&server, None);

        let mut seen = Vec::new();
        let out = client
            .generate_streaming(request(), |text| seen.push(text.to_string()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out, "Hello");
        assert_eq!(seen, ["Hel", "Hello"]);
    }

    #[tokio::test]
    async fn test_in_stream_401_triggers_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"accessToken": "hf_stale"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"type\":\"error\",\"error\":\"API request failed with status 401 Unauthorized\"}\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"accessToken": "hf_fresh"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"type\":\"chunk\",\"content\":\"ok\"}\n\ndata: {\"type\":\"done\"}\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        let (client, refreshes) = client(&server, Some("hf_fresh"));

        let out = client
            .generate_streaming(request(), |_| {}, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }
}
