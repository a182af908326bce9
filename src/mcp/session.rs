use super::error::{McpError, McpResult};
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use rmcp::service::RunningService;
use rmcp::RoleClient;
use serde_json::Value;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

/// A tool as its server declares it.
#[derive(Debug, Clone, PartialEq)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl From<Tool> for McpTool {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            description: tool.description.map(Cow::into_owned),
            input_schema: Value::Object((*tool.input_schema).clone()),
        }
    }
}

/// What a tool call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Content blocks in their wire form
    pub content: Vec<Value>,
    pub is_error: bool,
}

impl TryFrom<CallToolResult> for ToolOutput {
    type Error = McpError;

    fn try_from(result: CallToolResult) -> McpResult<Self> {
        let content = result
            .content
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            content,
            is_error: result.is_error.unwrap_or(false),
        })
    }
}

/// An initialized connection to one tool server.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Every tool the server declares, following pagination cursors.
    async fn list_tools(&self) -> McpResult<Vec<McpTool>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolOutput>;
}

/// A running rmcp client. Dropping it closes the session.
pub struct RmcpSession {
    client: RunningService<RoleClient, ()>,
    timeout: Duration,
}

impl RmcpSession {
    pub const fn new(client: RunningService<RoleClient, ()>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn bounded<T>(&self, future: impl Future<Output = McpResult<T>>) -> McpResult<T> {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| McpError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl McpSession for RmcpSession {
    async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        self.bounded(async {
            let tools = self
                .client
                .list_all_tools()
                .await
                .map_err(|e| McpError::Transport(format!("list tools: {e}")))?;
            Ok(tools.into_iter().map(McpTool::from).collect())
        })
        .await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolOutput> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            _ => None,
        };
        let request = CallToolRequestParam {
            name: Cow::Owned(name.to_string()),
            arguments,
        };
        self.bounded(async {
            let result = self
                .client
                .call_tool(request)
                .await
                .map_err(|e| McpError::ToolExecution(e.to_string()))?;
            ToolOutput::try_from(result)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_tool_keeps_schema_and_description() {
        let schema = json!({"type": "object", "properties": {"city": {"type": "string"}}});
        let Value::Object(schema) = schema else {
            unreachable!()
        };
        let tool = Tool::new("get_weather", "Current weather", Arc::new(schema.clone()));

        let tool = McpTool::from(tool);
        assert_eq!(tool.name, "get_weather");
        assert_eq!(tool.description.as_deref(), Some("Current weather"));
        assert_eq!(tool.input_schema, Value::Object(schema));
    }

    #[test]
    fn test_error_result_keeps_content() {
        let output = ToolOutput::try_from(CallToolResult::error(vec![Content::text("boom")])).unwrap();
        assert!(output.is_error);
        assert_eq!(output.content, vec![json!({"type": "text", "text": "boom"})]);
    }

    #[test]
    fn test_success_result_is_not_an_error() {
        let output = ToolOutput::try_from(CallToolResult::success(vec![Content::text("72F")])).unwrap();
        assert!(!output.is_error);
        assert_eq!(output.content[0]["text"], "72F");
    }
}
