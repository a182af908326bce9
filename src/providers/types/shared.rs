use serde::{Deserialize, Serialize};

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Error envelope returned by OpenAI-compatible APIs.
///
/// Some gateways return `{"error": "message"}` instead of the nested object.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Detailed {
        message: String,
        #[serde(rename = "type", default)]
        error_type: Option<String>,
        #[serde(default)]
        code: Option<serde_json::Value>,
    },
    Plain(String),
}

impl ErrorBody {
    pub fn message(&self) -> &str {
        match self {
            Self::Detailed { message, .. } | Self::Plain(message) => message,
        }
    }
}
