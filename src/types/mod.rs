//! Core value types shared across the engine.

pub mod generation;
pub mod message;
pub mod stream;
pub mod usage;

pub use generation::{FinishReason, GenerationSettings};
pub use message::{AgentToolCall, AgentToolResult, ContentPart, ImageContent, ModelMessage, Role};
pub use stream::{StreamEventType, TextStreamDelta};
pub use usage::Usage;
