//! Model references and capabilities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Reference to a model behind a registered provider family.
///
/// Parsed from `"provider:model-id"` strings; selection of the concrete
/// adapter is a configuration lookup in the provider registry, never runtime
/// type inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LanguageModel {
    pub provider: String,
    pub model_id: String,
}

impl LanguageModel {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for LanguageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_id)
    }
}

impl FromStr for LanguageModel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((provider, model_id)) if !provider.is_empty() && !model_id.is_empty() => {
                Ok(Self::new(provider, model_id))
            }
            _ => Err(EngineError::ModelNotFound(format!(
                "expected 'provider:model-id', got '{s}'"
            ))),
        }
    }
}

/// Capabilities of a model, as reported by its provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub supports_tools: bool,
    pub supports_reasoning: bool,
    pub context_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<usize>,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_reasoning: false,
            context_length: 128_000,
            max_output_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_and_model_id() {
        let model: LanguageModel = "openai:gpt-4o".parse().unwrap();
        assert_eq!(model.provider, "openai");
        assert_eq!(model.model_id, "gpt-4o");
        assert_eq!(model.to_string(), "openai:gpt-4o");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!("gpt-4o".parse::<LanguageModel>().is_err());
        assert!(":gpt-4o".parse::<LanguageModel>().is_err());
        assert!("openai:".parse::<LanguageModel>().is_err());
    }
}
