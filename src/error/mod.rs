//! Error types for the engine.

use thiserror::Error;

/// Primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Workflow cycle detected involving node '{0}'")]
    DagCycle(String),

    #[error("Workflow node '{0}' is unreachable (no resolvable upstream edges)")]
    UnreachableNode(String),

    #[error("Workflow validation error: {0}")]
    DagValidation(String),

    #[error("Session {0} already has a turn in progress")]
    TurnInProgress(uuid::Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid schedule expression: {0}")]
    Schedule(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Canceled")]
    Canceled,
}

impl EngineError {
    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Whether this error is terminal for the operation in progress.
    ///
    /// Tool failures, branch ambiguity, and KB unavailability are absorbed as
    /// data; provider and DAG validation failures end the operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. }
                | Self::DagCycle(_)
                | Self::UnreachableNode(_)
                | Self::DagValidation(_)
                | Self::Canceled
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification_matches_propagation_policy() {
        assert!(EngineError::provider("stub", "boom").is_terminal());
        assert!(EngineError::DagCycle("a".into()).is_terminal());
        assert!(!EngineError::tool("get_weather", "failed").is_terminal());
        assert!(!EngineError::Storage("missing".into()).is_terminal());
    }
}
