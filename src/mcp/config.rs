use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Transport used to reach a tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpProtocol {
    /// Legacy HTTP+SSE: a GET event stream plus a POST endpoint it announces
    Sse,
    /// Streamable HTTP: one POST per message
    Http,
}

/// A tool server enabled for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    pub protocol: McpProtocol,
    /// Extra headers sent with every request to this server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}
