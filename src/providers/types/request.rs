use super::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the relay owns in the outgoing body; caller config may not override them.
pub(crate) const RESERVED_KEYS: &[&str] = &[
    "model",
    "messages",
    "tools",
    "response_format",
    "stream",
    "stream_options",
    "provider",
];

/// OpenAI-style function schema presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub strict: bool,
}

impl ToolSchema {
    pub fn function(name: impl Into<String>, description: Option<String>, parameters: Value) -> Self {
        let name = name.into();
        Self {
            tool_type: "function".to_string(),
            function: FunctionSchema {
                description: description.unwrap_or_else(|| name.clone()),
                name,
                parameters,
                strict: true,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Normalized request handed to a provider adapter.
#[derive(Debug, Clone, Default)]
pub struct GenerationArgs {
    pub model: String,
    pub messages: Vec<Message>,
    /// Routing hint for the hosted inference gateway
    pub provider: Option<String>,
    /// Opaque sampling configuration (temperature, top_p, max_tokens, ...)
    pub config: Map<String, Value>,
    pub tools: Vec<ToolSchema>,
    pub response_format: Option<Value>,
}

/// Wire body of `POST /chat/completions`.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "no_tools")]
    pub tools: &'a [ToolSchema],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<&'a Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

fn no_tools(tools: &&[ToolSchema]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

impl<'a> ChatCompletionRequest<'a> {
    /// Builds the wire body, taking the model id from `model` so adapters can
    /// rewrite it (for example to append a provider suffix).
    pub fn new(model: &'a str, args: &'a GenerationArgs, stream: bool) -> Self {
        let config = args
            .config
            .iter()
            .filter(|(key, value)| !RESERVED_KEYS.contains(&key.as_str()) && !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            model,
            messages: &args.messages,
            tools: &args.tools,
            response_format: args.response_format.as_ref(),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
            config,
        }
    }
}
