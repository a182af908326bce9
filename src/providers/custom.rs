use crate::core::LLMError;
use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::adapter::{ChunkStream, CompletionAdapter};
use super::client::ChatCompletionsClient;
use super::types::{ChatCompletion, GenerationArgs};

/// A user-registered OpenAI-compatible endpoint.
///
/// Arguments are forwarded as given; the provider hint has no meaning here.
pub struct CustomAdapter {
    client: ChatCompletionsClient,
}

impl CustomAdapter {
    pub fn new(client: Client, endpoint_url: &str, access_token: Option<String>) -> Self {
        Self {
            client: ChatCompletionsClient::new(client, endpoint_url, access_token),
        }
    }
}

#[async_trait]
impl CompletionAdapter for CustomAdapter {
    async fn stream(
        &self,
        args: &GenerationArgs,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, LLMError> {
        self.client
            .complete_streaming(&args.model, args, cancel)
            .await
    }

    async fn generate(&self, args: &GenerationArgs) -> Result<ChatCompletion, LLMError> {
        self.client.complete(&args.model, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Message;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_forwards_model_and_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-local"))
            .and(body_partial_json(json!({"model": "my-llama", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = CustomAdapter::new(
            Client::new(),
            &format!("{}/v1", server.uri()),
            Some("sk-local".to_string()),
        );
        let args = GenerationArgs {
            model: "my-llama".to_string(),
            messages: vec![Message::user("ping")],
            provider: Some("together".to_string()),
            ..Default::default()
        };

        let completion = adapter.generate(&args).await.unwrap();
        assert_eq!(completion.choices[0].message.content(), "ok");
    }
}
