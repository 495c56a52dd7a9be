//! Shared fixtures: a scripted provider family and event-stream helpers.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use tycho::config::EngineConfig;
use tycho::error::EngineError;
use tycho::events::{SessionEvent, TurnEvent};
use tycho::models::ModelCapabilities;
use tycho::provider::{
    ModelProvider, ProviderFactory, ProviderRegistry, ProviderRequest, ProviderResponse,
};
use tycho::types::{AgentToolCall, FinishReason, TextStreamDelta, Usage};

/// Scripted behavior for one stub model. Streamed completions and
/// non-streaming replies are popped in order; shared across every provider
/// instance the factory hands out for the model.
pub struct Script {
    caps: ModelCapabilities,
    streams: Mutex<VecDeque<ScriptedStream>>,
    texts: Mutex<VecDeque<String>>,
}

/// One queued streamed completion. A stalled stream yields its deltas and
/// then never finishes, holding the turn open for cancellation tests.
struct ScriptedStream {
    deltas: Vec<TextStreamDelta>,
    stall: bool,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Self::with_capabilities(ModelCapabilities::default())
    }

    pub fn with_capabilities(caps: ModelCapabilities) -> Arc<Self> {
        Arc::new(Self {
            caps,
            streams: Mutex::new(VecDeque::new()),
            texts: Mutex::new(VecDeque::new()),
        })
    }

    /// Queue the deltas for the next `stream_text` call.
    pub fn push_stream(&self, deltas: Vec<TextStreamDelta>) {
        self.streams.lock().unwrap().push_back(ScriptedStream {
            deltas,
            stall: false,
        });
    }

    /// Queue a stream that emits text and then hangs without finishing.
    pub fn push_stalled_text(&self, text: &str) {
        self.streams.lock().unwrap().push_back(ScriptedStream {
            deltas: vec![TextStreamDelta::text_delta(text)],
            stall: true,
        });
    }

    /// Queue a plain text stream that reports usage and finishes.
    pub fn push_answer(&self, text: &str) {
        self.push_stream(vec![
            TextStreamDelta::text_delta(text),
            TextStreamDelta::usage(Usage::new(5, 7)),
            TextStreamDelta::done(),
        ]);
    }

    /// Queue a stream that requests one tool call.
    pub fn push_tool_request(&self, call: AgentToolCall) {
        self.push_stream(vec![
            TextStreamDelta::tool_call(call),
            TextStreamDelta::usage(Usage::new(3, 2)),
            TextStreamDelta::done(),
        ]);
    }

    /// Queue the reply for the next `generate_text` call.
    pub fn push_text(&self, text: &str) {
        self.texts.lock().unwrap().push_back(text.to_string());
    }

    fn next_stream(&self) -> ScriptedStream {
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedStream {
                deltas: vec![TextStreamDelta::text_delta("ok"), TextStreamDelta::done()],
                stall: false,
            })
    }

    fn next_text(&self) -> String {
        self.texts.lock().unwrap().pop_front().unwrap_or_default()
    }
}

struct StubProvider {
    model_id: String,
    script: Arc<Script>,
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
        &self.script.caps
    }

    async fn generate_text(
        &self,
        _request: &ProviderRequest,
    ) -> Result<ProviderResponse, EngineError> {
        Ok(ProviderResponse {
            text: self.script.next_text(),
            usage: Usage::new(2, 3),
            tool_calls: Vec::new(),
            finish_reason: Some(FinishReason::Stop),
        })
    }

    async fn stream_text(
        &self,
        _request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta, EngineError>>, EngineError> {
        let scripted = self.script.next_stream();
        let head = futures::stream::iter(scripted.deltas.into_iter().map(Ok));
        if scripted.stall {
            Ok(head.chain(futures::stream::pending()).boxed())
        } else {
            Ok(head.boxed())
        }
    }
}

/// Factory serving the "stub" provider key, one script per model id.
pub struct StubFactory {
    scripts: HashMap<String, Arc<Script>>,
}

impl StubFactory {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
        }
    }

    pub fn with_model(mut self, model_id: &str, script: Arc<Script>) -> Self {
        self.scripts.insert(model_id.to_string(), script);
        self
    }
}

impl ProviderFactory for StubFactory {
    fn provider_keys(&self) -> &[&str] {
        &["stub"]
    }

    fn create(
        &self,
        _config: &EngineConfig,
        _provider_key: &str,
        model_id: &str,
    ) -> Result<Box<dyn ModelProvider>, EngineError> {
        let script = self
            .scripts
            .get(model_id)
            .cloned()
            .unwrap_or_else(Script::new);
        Ok(Box::new(StubProvider {
            model_id: model_id.to_string(),
            script,
        }))
    }
}

/// A registry with one scripted model under "stub:stub-model".
pub fn single_model_registry(script: Arc<Script>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(StubFactory::new().with_model("stub-model", script)));
    Arc::new(registry)
}

pub fn registry_from(factory: StubFactory) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(factory));
    Arc::new(registry)
}

/// Collect events until the terminal one (inclusive).
pub async fn drain(mut events: UnboundedReceiverStream<SessionEvent>) -> Vec<TurnEvent> {
    let mut collected = Vec::new();
    while let Some(envelope) = events.next().await {
        let terminal = envelope.event.is_terminal();
        collected.push(envelope.event);
        if terminal {
            break;
        }
    }
    collected
}

/// Index of the first event matching the predicate.
pub fn position<F>(events: &[TurnEvent], predicate: F) -> usize
where
    F: Fn(&TurnEvent) -> bool,
{
    events
        .iter()
        .position(predicate)
        .unwrap_or_else(|| panic!("expected event not found in {events:#?}"))
}
