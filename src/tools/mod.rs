//! Tool trait, registry, and invoker backends.

pub mod http;
pub mod invoker;
pub mod mcp;
pub mod registry;
pub mod tool;
pub mod validation;

pub use http::HttpTool;
pub use invoker::{denied_result, ToolInvoker, ToolOutcome};
pub use mcp::{McpEndpoint, McpTool};
pub use registry::ToolRegistry;
pub use tool::{FunctionTool, Tool};
