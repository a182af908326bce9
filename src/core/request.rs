use crate::mcp::McpServerConfig;
use crate::providers::{GenerationArgs, Message, ToolSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The model a request targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    /// User-registered OpenAI-compatible model
    #[serde(default)]
    pub is_custom: bool,
    /// Credential for the custom endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub model: ModelDescriptor,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(
        rename = "response_format",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub response_format: Option<Value>,
    /// Credential for the hosted inference router
    #[serde(default)]
    pub access_token: String,
    #[serde(rename = "enabledMCPs", default)]
    pub enabled_mcps: Vec<McpServerConfig>,
}

impl GenerateRequest {
    /// Normalized adapter arguments for this request and the merged tool list.
    ///
    /// A requested `max_tokens` above `token_limit` is lowered to it. An
    /// absent `max_tokens` stays absent.
    pub fn generation_args(
        &self,
        tools: Vec<ToolSchema>,
        token_limit: Option<u32>,
    ) -> GenerationArgs {
        let mut config = self.config.clone();
        if let Some(limit) = token_limit {
            let requested = config.get("max_tokens").and_then(Value::as_u64);
            if requested.is_some_and(|requested| requested > u64::from(limit)) {
                config.insert("max_tokens".to_string(), Value::from(limit));
            }
        }

        GenerationArgs {
            model: self.model.id.clone(),
            messages: self.messages.clone(),
            provider: self.provider.clone(),
            config,
            tools,
            response_format: self.response_format.clone(),
        }
    }
}
