//! Knowledge-base retrieval seam.
//!
//! Retrieval lives outside the engine; a [`KnowledgeBase`] returns ranked
//! context snippets for a query. Retrieval failure never blocks a turn; the
//! engine degrades to a warning event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One ranked context snippet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSnippet {
    pub source: String,
    pub content: String,
    pub score: f64,
}

/// Ranked snippet retrieval for an attached knowledge base.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Knowledge base identity, used in warning events.
    fn name(&self) -> &str;

    /// Retrieve ranked snippets for a query.
    async fn retrieve(&self, query: &str, limit: usize)
        -> Result<Vec<ContextSnippet>, EngineError>;
}

/// Render retrieved snippets into a transcript context block.
pub fn render_context(snippets: &[ContextSnippet]) -> String {
    let mut block = String::from("Relevant context:\n");
    for snippet in snippets {
        block.push_str(&format!("[{}] {}\n", snippet.source, snippet.content));
    }
    block
}
