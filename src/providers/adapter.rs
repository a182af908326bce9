use crate::core::{Config, GenerateRequest, LLMError};
use async_trait::async_trait;
use futures::Stream;
use log::debug;
use reqwest::Client;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use super::custom::CustomAdapter;
use super::hub::HubAdapter;
use super::types::{ChatCompletion, ChatCompletionChunk, GenerationArgs};

pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, LLMError>> + Send + 'static>>;

/// Normalizes an upstream chat-completions API to one contract.
#[async_trait]
pub trait CompletionAdapter: Send + Sync {
    /// Streams completion deltas. The stream ends with
    /// `LLMError::Cancelled` once `cancel` fires.
    async fn stream(
        &self,
        args: &GenerationArgs,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, LLMError>;

    /// Requests a single, complete assistant turn.
    async fn generate(&self, args: &GenerationArgs) -> Result<ChatCompletion, LLMError>;
}

/// Picks the adapter for a request: user-registered models go to their own
/// OpenAI-compatible endpoint, catalog models to the hosted router.
pub fn create_adapter(
    request: &GenerateRequest,
    config: &Config,
    client: Client,
) -> Result<Box<dyn CompletionAdapter>, LLMError> {
    let model = &request.model;
    if model.is_custom {
        let endpoint_url = model.endpoint_url.as_deref().ok_or_else(|| {
            LLMError::ConfigError(format!("Custom model '{}' has no endpoint URL", model.id))
        })?;
        debug!("[Adapter] custom endpoint {endpoint_url} for {}", model.id);
        return Ok(Box::new(CustomAdapter::new(
            client,
            endpoint_url,
            model.access_token.clone(),
        )));
    }

    debug!("[Adapter] hosted inference for {}", model.id);
    Ok(Box::new(HubAdapter::new(
        client,
        &config.inference.hub_base_url,
        request.access_token.clone(),
    )))
}
