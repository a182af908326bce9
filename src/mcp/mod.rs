//! Client side of the Model Context Protocol: connecting to the tool servers
//! a request enables and executing the tool calls a model makes.

pub mod config;
pub mod error;
pub mod manager;
pub mod session;

pub use config::{McpProtocol, McpServerConfig};
pub use error::{McpError, McpResult};
pub use manager::{
    connect_to_mcp_servers, execute_mcp_tool, merged_tools, HttpConnector, McpConnection,
    McpConnector,
};
pub use session::{McpSession, McpTool, RmcpSession, ToolOutput};
