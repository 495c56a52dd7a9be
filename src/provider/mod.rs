//! Provider adapter trait and registry.
//!
//! Concrete provider wire formats live outside this crate; adapters arrive
//! already normalized to the [`ModelProvider`] streamed-completion contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::ModelCapabilities;
use crate::types::{
    AgentToolCall, FinishReason, GenerationSettings, ModelMessage, TextStreamDelta, Usage,
};

/// A request sent to a provider adapter.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Response from a non-streaming provider call.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: Usage,
    pub tool_calls: Vec<AgentToolCall>,
    pub finish_reason: Option<FinishReason>,
}

/// Core trait implemented by all provider adapters.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider family name (e.g., "openai", "anthropic").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Capabilities of the model.
    fn capabilities(&self) -> &ModelCapabilities;

    /// Generate text (non-streaming). Used for routing and summarization calls.
    async fn generate_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, EngineError>;

    /// Generate text (streaming).
    async fn stream_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta, EngineError>>, EngineError>;
}

/// Factory producing providers for one or more provider keys.
pub trait ProviderFactory: Send + Sync {
    /// Provider keys this factory serves.
    fn provider_keys(&self) -> &[&str];

    /// Create a provider instance for the given key and model id.
    fn create(
        &self,
        config: &EngineConfig,
        provider_key: &str,
        model_id: &str,
    ) -> Result<Box<dyn ModelProvider>, EngineError>;
}

/// Registry mapping provider keys to their factories.
///
/// Selection is a configuration lookup; the engine never inspects provider
/// types at runtime.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for all provider keys it declares.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        for key in factory.provider_keys() {
            self.factories.insert(key.to_string(), factory.clone());
        }
    }

    /// Create a provider instance by looking up the registered factory.
    pub fn create_provider(
        &self,
        provider_key: &str,
        model_id: &str,
        config: &EngineConfig,
    ) -> Result<Box<dyn ModelProvider>, EngineError> {
        self.factories
            .get(provider_key)
            .ok_or_else(|| {
                EngineError::ModelNotFound(format!(
                    "No provider factory registered for '{provider_key}'"
                ))
            })?
            .create(config, provider_key, model_id)
    }

    /// Check whether a factory is registered for the given key.
    pub fn has_provider(&self, provider_key: &str) -> bool {
        self.factories.contains_key(provider_key)
    }

    /// List all registered provider keys.
    pub fn provider_keys(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    struct StubFactory;

    impl ProviderFactory for StubFactory {
        fn provider_keys(&self) -> &[&str] {
            &["stub", "stub-alias"]
        }

        fn create(
            &self,
            _config: &EngineConfig,
            _provider_key: &str,
            model_id: &str,
        ) -> Result<Box<dyn ModelProvider>, EngineError> {
            Ok(Box::new(StubProvider {
                model_id: model_id.to_string(),
                caps: ModelCapabilities::default(),
            }))
        }
    }

    struct StubProvider {
        model_id: String,
        caps: ModelCapabilities,
    }

    #[async_trait]
    impl ModelProvider for StubProvider {
        fn provider_name(&self) -> &str {
            "stub"
        }
        fn model_id(&self) -> &str {
            &self.model_id
        }
        fn capabilities(&self) -> &ModelCapabilities {
            &self.caps
        }
        async fn generate_text(
            &self,
            _request: &ProviderRequest,
        ) -> Result<ProviderResponse, EngineError> {
            Ok(ProviderResponse {
                text: "stub".to_string(),
                usage: Usage::default(),
                tool_calls: vec![],
                finish_reason: None,
            })
        }
        async fn stream_text(
            &self,
            _request: &ProviderRequest,
        ) -> Result<BoxStream<'static, Result<TextStreamDelta, EngineError>>, EngineError>
        {
            Ok(Box::pin(stream::iter(vec![Ok(TextStreamDelta::done())])))
        }
    }

    #[test]
    fn register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubFactory));

        assert!(registry.has_provider("stub"));
        assert!(registry.has_provider("stub-alias"));
        assert!(!registry.has_provider("unknown"));

        let provider = registry
            .create_provider("stub", "my-model", &EngineConfig::new())
            .unwrap();
        assert_eq!(provider.model_id(), "my-model");
        assert_eq!(provider.provider_name(), "stub");
    }

    #[test]
    fn create_unregistered_fails() {
        let registry = ProviderRegistry::new();
        let result = registry.create_provider("nope", "m", &EngineConfig::new());
        match result {
            Err(EngineError::ModelNotFound(msg)) => assert!(msg.contains("nope")),
            Err(e) => panic!("expected ModelNotFound, got error: {e}"),
            Ok(_) => panic!("expected ModelNotFound, got Ok"),
        }
    }
}
