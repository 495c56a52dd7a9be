//! MCP-bridged tools.
//!
//! The MCP wire protocol is a collaborator outside this crate; an
//! [`McpEndpoint`] hands the engine named tools and executes calls against
//! the remote server. Bridged tools behave like any other invoker backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;

use super::tool::Tool;

/// Connection to an MCP server, normalized to name-based tool calls.
#[async_trait]
pub trait McpEndpoint: Send + Sync {
    /// Endpoint identity, used in error messages.
    fn server_name(&self) -> &str;

    /// Invoke a remote tool by name.
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<serde_json::Value, EngineError>;
}

/// A tool exposed by a remote MCP server.
pub struct McpTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    requires_approval: bool,
    endpoint: Arc<dyn McpEndpoint>,
}

impl McpTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        endpoint: Arc<dyn McpEndpoint>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            requires_approval: false,
            endpoint,
        }
    }

    pub fn with_approval_required(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }

    fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<serde_json::Value, EngineError> {
        self.endpoint
            .call_tool(&self.name, args)
            .await
            .map_err(|err| {
                EngineError::tool(
                    &self.name,
                    format!("mcp server '{}': {err}", self.endpoint.server_name()),
                )
            })
    }
}

impl std::fmt::Debug for McpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTool")
            .field("name", &self.name)
            .field("server", &self.endpoint.server_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoEndpoint;

    #[async_trait]
    impl McpEndpoint for EchoEndpoint {
        fn server_name(&self) -> &str {
            "echo-server"
        }

        async fn call_tool(
            &self,
            tool_name: &str,
            arguments: &serde_json::Value,
        ) -> Result<serde_json::Value, EngineError> {
            Ok(json!({ "tool": tool_name, "args": arguments }))
        }
    }

    #[tokio::test]
    async fn bridges_call_to_endpoint() {
        let tool = McpTool::new("remote_echo", "Echo", json!({}), Arc::new(EchoEndpoint));
        let result = tool.execute(&json!({"x": 1})).await.unwrap();
        assert_eq!(result["tool"], "remote_echo");
        assert_eq!(result["args"]["x"], 1);
    }
}
