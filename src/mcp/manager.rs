use super::config::{McpProtocol, McpServerConfig};
use super::error::{McpError, McpResult};
use super::session::{McpSession, RmcpSession};
use crate::core::config::McpConfig;
use crate::providers::{Message, ToolCall, ToolSchema};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, error, info, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use rmcp::service::RunningService;
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport};
use rmcp::{RoleClient, ServiceExt};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A live session with one tool server and the tools it exports.
#[derive(Clone)]
pub struct McpConnection {
    pub server_name: String,
    pub session: Arc<dyn McpSession>,
    pub tools: Vec<ToolSchema>,
}

impl McpConnection {
    pub fn exports(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name() == tool_name)
    }
}

impl std::fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpConnection")
            .field("server_name", &self.server_name)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// Opens an initialized session to a configured server.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, server: &McpServerConfig) -> McpResult<Arc<dyn McpSession>>;
}

/// Converts configured header pairs, skipping any that are not valid HTTP.
fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("[MCP] ignoring invalid header {name}"),
        }
    }
    map
}

/// Connects over the transport each server configuration names.
pub struct HttpConnector {
    client: Client,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(client: Client, config: &McpConfig) -> Self {
        Self {
            client,
            timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// The shared client, or a dedicated one when the server needs headers.
    fn client_for(&self, server: &McpServerConfig) -> McpResult<Client> {
        match server.headers.as_ref().filter(|h| !h.is_empty()) {
            Some(headers) => Ok(Client::builder()
                .default_headers(header_map(headers))
                .build()?),
            None => Ok(self.client.clone()),
        }
    }

    async fn start(&self, server: &McpServerConfig) -> McpResult<RunningService<RoleClient, ()>> {
        let client = self.client_for(server)?;
        match server.protocol {
            McpProtocol::Http => {
                let transport = StreamableHttpClientTransport::with_client(
                    client,
                    StreamableHttpClientTransportConfig::with_uri(server.url.as_str()),
                );
                ().serve(transport).await.map_err(|e| {
                    McpError::ConnectionFailed(format!("initialize streamable client: {e}"))
                })
            }
            McpProtocol::Sse => {
                let config = SseClientConfig {
                    sse_endpoint: server.url.clone().into(),
                    ..Default::default()
                };
                let transport = SseClientTransport::start_with_client(client, config)
                    .await
                    .map_err(|e| McpError::Transport(format!("create SSE transport: {e}")))?;
                ().serve(transport).await.map_err(|e| {
                    McpError::ConnectionFailed(format!("initialize SSE client: {e}"))
                })
            }
        }
    }
}

#[async_trait]
impl McpConnector for HttpConnector {
    async fn connect(&self, server: &McpServerConfig) -> McpResult<Arc<dyn McpSession>> {
        let client = tokio::time::timeout(self.timeout, self.start(server))
            .await
            .map_err(|_| McpError::Timeout(self.timeout))??;
        debug!("[MCP] session open with {}", server.name);
        Ok(Arc::new(RmcpSession::new(client, self.timeout)))
    }
}

async fn connect_one(
    connector: &dyn McpConnector,
    server: &McpServerConfig,
) -> McpResult<McpConnection> {
    let session = connector.connect(server).await?;
    let tools = session
        .list_tools()
        .await?
        .into_iter()
        .map(|tool| ToolSchema::function(tool.name, tool.description, tool.input_schema))
        .collect::<Vec<_>>();
    info!(
        "[MCP] connected to {} ({} tools)",
        server.name,
        tools.len()
    );
    Ok(McpConnection {
        server_name: server.name.clone(),
        session,
        tools,
    })
}

/// Connects to every server concurrently.
///
/// Servers that fail to connect, or to list their tools, are logged and left
/// out. Connections keep configuration order, and a tool name exported by
/// more than one server stays with the first.
pub async fn connect_to_mcp_servers(
    connector: &dyn McpConnector,
    servers: &[McpServerConfig],
    cancel: &CancellationToken,
) -> Vec<McpConnection> {
    let attempts = servers.iter().map(|server| async move {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(McpError::Cancelled),
            result = connect_one(connector, server) => result,
        };
        result
            .map_err(|e| error!("[MCP] failed to connect to {} ({}): {e}", server.name, server.url))
            .ok()
    });

    let mut seen = HashSet::new();
    join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .map(|mut connection| {
            connection.tools.retain(|tool| {
                let first = seen.insert(tool.name().to_string());
                if !first {
                    warn!(
                        "[MCP] tool {} from {} shadowed by an earlier server",
                        tool.name(),
                        connection.server_name
                    );
                }
                first
            });
            connection
        })
        .collect()
}

/// Every tool offered across `connections`, in connection order.
pub fn merged_tools(connections: &[McpConnection]) -> Vec<ToolSchema> {
    connections
        .iter()
        .flat_map(|connection| connection.tools.iter().cloned())
        .collect()
}

fn parse_arguments(arguments: &str) -> McpResult<Value> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str(arguments) {
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(McpError::InvalidArguments(
            "arguments must be a JSON object".to_string(),
        )),
        Err(e) => Err(McpError::InvalidArguments(e.to_string())),
    }
}

async fn call(connections: &[McpConnection], tool_call: &ToolCall) -> McpResult<String> {
    let name = tool_call.function.name.as_str();
    let connection = connections
        .iter()
        .find(|connection| connection.exports(name))
        .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
    let arguments = parse_arguments(&tool_call.function.arguments)?;

    info!("[MCP] calling {name} on {}", connection.server_name);
    let result = connection.session.call_tool(name, arguments).await?;
    if result.is_error {
        warn!("[MCP] {name} reported an error result");
    }
    Ok(serde_json::to_string(&result.content)?)
}

/// Runs `tool_call` on the server exporting it and wraps the outcome as a
/// `tool` message. Never fails: errors become `{"error": ...}` content.
pub async fn execute_mcp_tool(connections: &[McpConnection], tool_call: &ToolCall) -> Message {
    let content = match call(connections, tool_call).await {
        Ok(content) => content,
        Err(e) => {
            error!("[MCP] tool call {tool_call} failed: {e}");
            json!({ "error": e.to_string() }).to_string()
        }
    };
    Message::tool(content, &tool_call.id)
}
