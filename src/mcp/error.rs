//! Tool server error types.

use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Tool {0} not found in any connected MCP server")]
    ToolNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
