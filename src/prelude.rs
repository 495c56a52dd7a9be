//! Common imports for embedding the engine.
//!
//! Pulls in the runtime facade, the definition types, the event stream
//! types, and a `StreamExt` so `events.next().await` works out of the box.

pub use crate::agent::{AgentDefinition, TeamDefinition, TeamMode};
pub use crate::config::EngineConfig;
pub use crate::error::{EngineError, Result};
pub use crate::events::{SessionEvent, TurnEvent};
pub use crate::knowledge::KnowledgeBase;
pub use crate::models::LanguageModel;
pub use crate::provider::{ModelProvider, ProviderFactory, ProviderRegistry};
pub use crate::runtime::{Runtime, WorkflowHandle};
pub use crate::store::InMemoryStore;
pub use crate::tools::{FunctionTool, Tool, ToolRegistry};
pub use crate::turn::TurnInput;
pub use crate::types::{AgentToolCall, AgentToolResult, ModelMessage, Usage};
pub use crate::workflow::{NodeKind, WorkflowDefinition};

pub use futures::StreamExt as _;
