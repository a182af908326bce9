use crate::core::LLMError;
use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::adapter::{ChunkStream, CompletionAdapter};
use super::client::ChatCompletionsClient;
use super::types::{ChatCompletion, GenerationArgs};

/// Provider value that lets the router choose.
pub const AUTO_PROVIDER: &str = "auto";

/// The hosted multi-provider inference router.
pub struct HubAdapter {
    client: ChatCompletionsClient,
}

impl HubAdapter {
    pub fn new(client: Client, base_url: &str, access_token: String) -> Self {
        Self {
            client: ChatCompletionsClient::new(client, base_url, Some(access_token)),
        }
    }

    fn routed_model(args: &GenerationArgs) -> String {
        routed_model(&args.model, args.provider.as_deref())
    }
}

/// The router selects a provider through a `model:provider` suffix.
pub fn routed_model(model: &str, provider: Option<&str>) -> String {
    match provider {
        Some(provider) if !provider.is_empty() && provider != AUTO_PROVIDER => {
            format!("{model}:{provider}")
        }
        _ => model.to_string(),
    }
}

#[async_trait]
impl CompletionAdapter for HubAdapter {
    async fn stream(
        &self,
        args: &GenerationArgs,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, LLMError> {
        let model = Self::routed_model(args);
        self.client.complete_streaming(&model, args, cancel).await
    }

    async fn generate(&self, args: &GenerationArgs) -> Result<ChatCompletion, LLMError> {
        let model = Self::routed_model(args);
        self.client.complete(&model, args).await
    }
}
