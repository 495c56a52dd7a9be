//! Tool invoker: executes a single named tool call.
//!
//! Execution errors never propagate: they are folded into an error-flagged
//! result so the turn engine can feed them back into the transcript.

use crate::types::{AgentToolCall, AgentToolResult};

use super::registry::ToolRegistry;
use super::validation::validate_arguments;

/// Outcome of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call: AgentToolCall,
    pub result: AgentToolResult,
}

/// Executes tool calls against a registry.
#[derive(Debug, Clone, Default)]
pub struct ToolInvoker {
    registry: ToolRegistry,
}

impl ToolInvoker {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Whether the named tool itself demands an approval gate.
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.registry
            .get(tool_name)
            .map(|tool| tool.requires_approval())
            .unwrap_or(false)
    }

    /// Execute one call. Unknown tools, invalid arguments, and handler
    /// failures all produce an error-flagged result.
    pub async fn invoke(&self, call: &AgentToolCall) -> ToolOutcome {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolOutcome {
                call: call.clone(),
                result: error_result(call, format!("Tool '{}' not found", call.name)),
            };
        };

        if let Err(validation_error) = validate_arguments(&call.arguments, tool.parameters()) {
            return ToolOutcome {
                call: call.clone(),
                result: error_result(
                    call,
                    format!("Argument validation failed: {validation_error}"),
                ),
            };
        }

        let result = match tool.execute(&call.arguments).await {
            Ok(value) => AgentToolResult {
                tool_call_id: call.id.clone(),
                result: value,
                is_error: false,
            },
            Err(error) => {
                tracing::warn!(tool = %call.name, %error, "tool execution failed");
                error_result(call, error.to_string())
            }
        };

        ToolOutcome {
            call: call.clone(),
            result,
        }
    }
}

/// Result recorded for a call whose approval was denied or timed out.
pub fn denied_result(call: &AgentToolCall, reason: &str) -> AgentToolResult {
    error_result(call, format!("approval {reason}"))
}

fn error_result(call: &AgentToolCall, message: impl Into<String>) -> AgentToolResult {
    AgentToolResult {
        tool_call_id: call.id.clone(),
        result: serde_json::json!({ "error": message.into() }),
        is_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::FunctionTool;
    use serde_json::json;
    use std::sync::Arc;

    fn weather_invoker() -> ToolInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FunctionTool::new(
            "get_weather",
            "Weather lookup",
            json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            }),
            |args| async move {
                let city = args["city"].as_str().unwrap_or_default().to_string();
                Ok(json!({ "city": city, "forecast": "sunny" }))
            },
        )));
        ToolInvoker::new(registry)
    }

    fn call(name: &str, args: serde_json::Value) -> AgentToolCall {
        AgentToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn invokes_registered_tool() {
        let invoker = weather_invoker();
        let outcome = invoker.invoke(&call("get_weather", json!({"city": "Tokyo"}))).await;
        assert!(!outcome.result.is_error);
        assert_eq!(outcome.result.result["forecast"], "sunny");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result_not_a_fault() {
        let invoker = weather_invoker();
        let outcome = invoker.invoke(&call("nope", json!({}))).await;
        assert!(outcome.result.is_error);
        assert!(outcome.result.result["error"]
            .as_str()
            .unwrap()
            .contains("not found"));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_execution() {
        let invoker = weather_invoker();
        let outcome = invoker.invoke(&call("get_weather", json!({}))).await;
        assert!(outcome.result.is_error);
        assert!(outcome.result.result["error"]
            .as_str()
            .unwrap()
            .contains("validation"));
    }
}
