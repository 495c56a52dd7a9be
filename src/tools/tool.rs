//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;

/// Core tool trait; implement to create custom tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the tool arguments.
    fn parameters(&self) -> &serde_json::Value;

    /// Whether invoking this tool requires a human approval first.
    ///
    /// Agents can additionally flag tools per-name; see
    /// [`crate::agent::AgentDefinition::approval_required_tools`].
    fn requires_approval(&self) -> bool {
        false
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, args: &serde_json::Value) -> Result<serde_json::Value, EngineError>;
}

type ToolHandler = dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, EngineError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    requires_approval: bool,
    handler: Arc<ToolHandler>,
}

impl FunctionTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, EngineError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            requires_approval: false,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Flag this tool as requiring approval before every invocation.
    pub fn with_approval_required(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
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
        (self.handler)(args.clone()).await
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("requires_approval", &self.requires_approval)
            .finish()
    }
}
