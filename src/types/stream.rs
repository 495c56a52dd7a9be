//! Streaming types: the uniform contract every provider adapter produces.

use serde::{Deserialize, Serialize};

use super::message::AgentToolCall;
use super::usage::Usage;

/// A delta emitted during streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextStreamDelta {
    /// The incremental text chunk.
    #[serde(default)]
    pub text: String,
    /// Event type.
    pub event_type: StreamEventType,
    /// Incremental reasoning content (only for `Reasoning` deltas).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Completed tool call request (only for `ToolCall` deltas).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<AgentToolCall>,
    /// Usage (typically only on the final delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TextStreamDelta {
    pub fn text_delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            event_type: StreamEventType::TextDelta,
            reasoning: None,
            tool_call: None,
            usage: None,
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::Reasoning,
            reasoning: Some(text.into()),
            tool_call: None,
            usage: None,
        }
    }

    pub fn tool_call(call: AgentToolCall) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::ToolCall,
            reasoning: None,
            tool_call: Some(call),
            usage: None,
        }
    }

    pub fn usage(usage: Usage) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::Usage,
            reasoning: None,
            tool_call: None,
            usage: Some(usage),
        }
    }

    pub fn done() -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::Done,
            reasoning: None,
            tool_call: None,
            usage: None,
        }
    }
}

/// Type of stream event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// Incremental text content.
    TextDelta,
    /// Incremental reasoning content.
    Reasoning,
    /// A tool call requested by the model.
    ToolCall,
    /// Token usage report.
    Usage,
    /// Stream finished.
    Done,
    /// Error during stream.
    Error,
}
