//! Turn engine: drives one conversational turn for a single agent.
//!
//! A turn is a bounded state machine: up to `max_rounds` iterations of one
//! model call plus any resulting tool calls. The loop exits when the model
//! requests no further tools, or force-exits with the partial answer when the
//! round cap is reached. Flagged tool calls suspend the turn on the approval
//! gate; compaction fires before a model call when the transcript crosses
//! the context threshold.

pub mod artifacts;
pub mod compaction;

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentDefinition;
use crate::approval::{ApprovalGate, ProposalGate};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventPublisher, TurnEvent};
use crate::knowledge::render_context;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::store::{
    ApprovalOutcome, EngineStore, MessageMetadata, ProposalOutcome, SpanKind, StoredMessage,
    ToolCallRecord, ToolCallStatus, TraceStore,
};
use crate::tools::{denied_result, ToolInvoker};
use crate::trace::TraceRecorder;
use crate::types::{
    AgentToolCall, AgentToolResult, ContentPart, ImageContent, ModelMessage, StreamEventType,
    Usage,
};

use artifacts::ArtifactScanner;

/// Reserved tool name by which an agent proposes creating a new tool. Calls
/// to it go through the proposal gate instead of the tool registry.
pub const PROPOSE_TOOL: &str = "propose_tool";

/// Snippets requested per attached knowledge base.
const KB_SNIPPET_LIMIT: usize = 5;

/// User input starting a turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub text: String,
    pub image: Option<ImageContent>,
    /// Tag applied to messages this turn persists; set by the team router
    /// for member turns.
    pub(crate) tag: MessageTag,
}

/// How persisted assistant messages are attributed.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MessageTag {
    pub agent_id: Option<Uuid>,
    pub intermediate: bool,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
            tag: MessageTag::default(),
        }
    }

    pub fn with_image(mut self, data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        self.image = Some(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        });
        self
    }

    pub(crate) fn tagged(mut self, agent_id: Uuid, intermediate: bool) -> Self {
        self.tag = MessageTag {
            agent_id: Some(agent_id),
            intermediate,
        };
        self
    }
}

/// Drives turns. One instance serves all sessions; per-session serialization
/// is the runtime's responsibility.
pub struct TurnEngine {
    config: EngineConfig,
    store: Arc<dyn EngineStore>,
    trace_store: Arc<dyn TraceStore>,
    approvals: Arc<ApprovalGate>,
    proposals: Arc<ProposalGate>,
}

/// Outcome of one tool round.
enum RoundExit {
    /// Tools executed, loop continues.
    Continue,
    /// Observer canceled mid-round.
    Canceled,
}

impl TurnEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn EngineStore>,
        trace_store: Arc<dyn TraceStore>,
        approvals: Arc<ApprovalGate>,
        proposals: Arc<ProposalGate>,
    ) -> Self {
        Self {
            config,
            store,
            trace_store,
            approvals,
            proposals,
        }
    }

    /// Run one turn to a terminal message.
    ///
    /// Emits every non-terminal event on `publisher`; the caller emits the
    /// terminal `done`/`error` from the returned result. Partial progress is
    /// persisted before any error or cancellation returns.
    pub async fn run(
        &self,
        session_id: Uuid,
        agent: &AgentDefinition,
        provider: Arc<dyn ModelProvider>,
        input: TurnInput,
        publisher: Arc<EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<ModelMessage> {
        let turn_started = Instant::now();
        let tag = input.tag;
        let recorder = TraceRecorder::new(self.trace_store.clone(), session_id);
        let invoker = ToolInvoker::new(agent.tools.clone());
        let caps = provider.capabilities().clone();

        let mut transcript = Vec::new();
        if let Some(prompt) = &agent.system_prompt {
            transcript.push(ModelMessage::system(prompt.clone()));
        }
        for stored in self.store.list_messages(session_id).await? {
            transcript.push(stored.message);
        }

        self.attach_knowledge(agent, &input.text, &mut transcript, &publisher)
            .await;

        let user_message = match &input.image {
            Some(image) => ModelMessage::user_with_image(
                input.text.clone(),
                image.data.clone(),
                image.mime_type.clone(),
            ),
            None => ModelMessage::user(input.text.clone()),
        };
        self.store
            .append_message(StoredMessage::new(session_id, user_message.clone()))
            .await?;
        transcript.push(user_message);

        let tool_defs = if agent.tools.is_empty() || !caps.supports_tools {
            None
        } else {
            Some(agent.tools.definitions())
        };

        let mut scanner = ArtifactScanner::new();
        let mut turn_usage = Usage::default();
        let mut final_text = String::new();
        let mut final_reasoning = String::new();
        let mut final_usage: Option<Usage> = None;

        for round in 1..=self.config.max_rounds {
            if compaction::over_threshold(
                &transcript,
                caps.context_length,
                self.config.compaction_threshold,
            ) {
                match compaction::compact(
                    provider.as_ref(),
                    &mut transcript,
                    self.config.keep_recent_messages,
                )
                .await
                {
                    Ok(0) => {}
                    Ok(folded) => publisher.emit(TurnEvent::ContextCompacted {
                        messages_summarized: folded,
                    }),
                    Err(error) => {
                        tracing::warn!(session_id = %session_id, %error, "compaction failed, continuing uncompacted");
                    }
                }
            }

            let request = ProviderRequest {
                messages: transcript.clone(),
                settings: agent.settings.clone(),
                tools: tool_defs.clone(),
            };

            let span = recorder.begin(SpanKind::LlmCall, agent.model.to_string(), round);
            let mut round_text = String::new();
            let mut round_reasoning = String::new();
            let mut round_calls: Vec<AgentToolCall> = Vec::new();
            let mut round_usage: Option<Usage> = None;
            let mut stream_error: Option<EngineError> = None;
            let mut canceled = false;

            match provider.stream_text(&request).await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            canceled = true;
                            break;
                        }
                        chunk = stream.next() => {
                            let Some(chunk) = chunk else { break };
                            let delta = match chunk {
                                Ok(delta) => delta,
                                Err(error) => {
                                    stream_error = Some(error);
                                    break;
                                }
                            };
                            match delta.event_type {
                                StreamEventType::TextDelta => {
                                    round_text.push_str(&delta.text);
                                    for event in scanner.scan(&delta.text) {
                                        publisher.emit(event);
                                    }
                                    publisher.emit(TurnEvent::ContentDelta { text: delta.text });
                                }
                                StreamEventType::Reasoning => {
                                    if let Some(reasoning) = delta.reasoning {
                                        round_reasoning.push_str(&reasoning);
                                        publisher.emit(TurnEvent::ReasoningDelta { text: reasoning });
                                    }
                                }
                                StreamEventType::ToolCall => {
                                    if let Some(call) = delta.tool_call {
                                        round_calls.push(call);
                                    }
                                }
                                StreamEventType::Usage => {
                                    if let Some(usage) = delta.usage {
                                        round_usage = Some(usage);
                                    }
                                }
                                StreamEventType::Done => break,
                                // Adapters signal failures as Err chunks.
                                StreamEventType::Error => {}
                            }
                        }
                    }
                },
                Err(error) => stream_error = Some(error),
            }

            if let Some(usage) = &round_usage {
                turn_usage.merge(usage);
            }
            span.finish(round_usage.clone(), stream_error.is_none() && !canceled)
                .await;

            if let Some(error) = stream_error {
                // Keep whatever streamed before the failure.
                if !round_text.is_empty() {
                    self.persist_assistant(
                        session_id,
                        agent,
                        &round_text,
                        &round_reasoning,
                        Vec::new(),
                        round_usage,
                        turn_started,
                        tag,
                    )
                    .await?;
                }
                return Err(error);
            }

            final_text = round_text.clone();
            final_reasoning = round_reasoning.clone();
            final_usage = round_usage.clone();

            if canceled {
                return self
                    .finish_turn(
                        session_id,
                        agent,
                        &final_text,
                        &final_reasoning,
                        final_usage,
                        turn_usage,
                        turn_started,
                        tag,
                        &publisher,
                    )
                    .await;
            }

            if round_calls.is_empty() {
                return self
                    .finish_turn(
                        session_id,
                        agent,
                        &final_text,
                        &final_reasoning,
                        final_usage,
                        turn_usage,
                        turn_started,
                        tag,
                        &publisher,
                    )
                    .await;
            }

            if round == self.config.max_rounds {
                publisher.emit(TurnEvent::Warning {
                    message: format!(
                        "tool round limit ({}) reached, returning partial answer",
                        self.config.max_rounds
                    ),
                });
                break;
            }

            let exit = self
                .run_tool_round(
                    session_id,
                    agent,
                    &invoker,
                    &recorder,
                    round,
                    &round_text,
                    &round_reasoning,
                    round_calls,
                    round_usage,
                    &mut transcript,
                    &publisher,
                    &cancel,
                    turn_started,
                    tag,
                )
                .await?;
            match exit {
                RoundExit::Continue => {}
                RoundExit::Canceled => {
                    // The round's partial message is already persisted with
                    // its tool calls; close out without writing it twice.
                    let session = self.store.add_session_usage(session_id, &turn_usage).await?;
                    publisher.emit(TurnEvent::Usage {
                        session_total_input: session.total_input_tokens,
                        session_total_output: session.total_output_tokens,
                    });
                    let message = ModelMessage::assistant(final_text);
                    publisher.emit(TurnEvent::MessageComplete {
                        message: message.clone(),
                    });
                    return Ok(message);
                }
            }
        }

        self.finish_turn(
            session_id,
            agent,
            &final_text,
            &final_reasoning,
            final_usage,
            turn_usage,
            turn_started,
            tag,
            &publisher,
        )
        .await
    }

    /// Retrieve knowledge-base context for the query. A failing KB degrades
    /// to a warning event; it never blocks the turn.
    async fn attach_knowledge(
        &self,
        agent: &AgentDefinition,
        query: &str,
        transcript: &mut Vec<ModelMessage>,
        publisher: &EventPublisher,
    ) {
        for kb in &agent.knowledge_bases {
            match kb.retrieve(query, KB_SNIPPET_LIMIT).await {
                Ok(snippets) if !snippets.is_empty() => {
                    transcript.push(ModelMessage::system(render_context(&snippets)));
                    publisher.emit(TurnEvent::KbContext {
                        kb_name: kb.name().to_string(),
                        snippets,
                    });
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(kb = kb.name(), %error, "knowledge retrieval failed");
                    publisher.emit(TurnEvent::KbNotIndexedWarning {
                        kb_name: kb.name().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
    }

    /// Execute one round's tool calls and fold the results back into the
    /// transcript.
    #[allow(clippy::too_many_arguments)]
    async fn run_tool_round(
        &self,
        session_id: Uuid,
        agent: &AgentDefinition,
        invoker: &ToolInvoker,
        recorder: &TraceRecorder,
        round: usize,
        round_text: &str,
        round_reasoning: &str,
        round_calls: Vec<AgentToolCall>,
        round_usage: Option<Usage>,
        transcript: &mut Vec<ModelMessage>,
        publisher: &EventPublisher,
        cancel: &CancellationToken,
        turn_started: Instant,
        tag: MessageTag,
    ) -> Result<RoundExit> {
        let mut records = Vec::new();
        let mut result_messages = Vec::new();
        let mut cancel_at: Option<(usize, ToolCallStatus)> = None;

        for (index, call) in round_calls.iter().enumerate() {
            publisher.emit(TurnEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                round,
                max_rounds: self.config.max_rounds,
            });

            let result = if call.name == PROPOSE_TOOL {
                match self.handle_proposal(session_id, call, publisher, cancel).await? {
                    Some(result) => result,
                    None => {
                        cancel_at = Some((index, ToolCallStatus::Pending));
                        break;
                    }
                }
            } else if agent.needs_approval(&call.name) {
                match self
                    .gated_invoke(session_id, call, invoker, recorder, round, publisher, cancel)
                    .await?
                {
                    Some(result) => result,
                    None => {
                        // Withdrawn before dispatch.
                        cancel_at = Some((index, ToolCallStatus::Pending));
                        break;
                    }
                }
            } else {
                match invoke_detached(invoker, call, recorder, round, cancel).await {
                    Some(result) => result,
                    None => {
                        // Dispatched; still finishing on its own task.
                        cancel_at = Some((index, ToolCallStatus::Running));
                        break;
                    }
                }
            };

            publisher.emit(TurnEvent::ToolCallResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: result.result.clone(),
                is_error: result.is_error,
            });
            records.push(ToolCallRecord {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: Some(result.result.clone()),
                status: if result.is_error {
                    ToolCallStatus::Error
                } else {
                    ToolCallStatus::Completed
                },
            });
            result_messages.push(ModelMessage::tool_result(
                call.id.clone(),
                result.result,
                result.is_error,
            ));
        }

        // Calls the cancellation interrupted keep their last observed state.
        if let Some((index, status)) = cancel_at {
            records.push(ToolCallRecord {
                id: round_calls[index].id.clone(),
                name: round_calls[index].name.clone(),
                arguments: round_calls[index].arguments.clone(),
                result: None,
                status,
            });
            for call in &round_calls[index + 1..] {
                records.push(ToolCallRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: None,
                    status: ToolCallStatus::Pending,
                });
            }
        }

        // Persist the assistant message with whatever calls resolved, then
        // feed the results back into the transcript.
        let mut assistant = if round_text.is_empty() {
            ModelMessage::assistant("")
        } else {
            ModelMessage::assistant(round_text)
        };
        if !round_reasoning.is_empty() {
            assistant.content.insert(
                0,
                ContentPart::Reasoning {
                    text: round_reasoning.to_string(),
                },
            );
        }
        for call in &round_calls {
            assistant.content.push(ContentPart::ToolCall(call.clone()));
        }

        let mut stored = StoredMessage::new(session_id, assistant.clone());
        stored.tool_calls = records;
        stored.metadata = MessageMetadata {
            model: Some(agent.model.to_string()),
            usage: round_usage,
            latency_ms: Some(turn_started.elapsed().as_millis() as u64),
            agent_id: tag.agent_id,
            intermediate: tag.intermediate,
        };
        self.store.append_message(stored).await?;

        transcript.push(assistant);
        for message in result_messages {
            self.store
                .append_message(StoredMessage::new(session_id, message.clone()))
                .await?;
            transcript.push(message);
        }

        if cancel_at.is_some() {
            Ok(RoundExit::Canceled)
        } else {
            Ok(RoundExit::Continue)
        }
    }

    /// Suspend on the approval gate, then execute or refuse. Returns `None`
    /// when the observer canceled while waiting.
    #[allow(clippy::too_many_arguments)]
    async fn gated_invoke(
        &self,
        session_id: Uuid,
        call: &AgentToolCall,
        invoker: &ToolInvoker,
        recorder: &TraceRecorder,
        round: usize,
        publisher: &EventPublisher,
        cancel: &CancellationToken,
    ) -> Result<Option<AgentToolResult>> {
        let ticket = self.approvals.open(session_id, call).await?;
        publisher.emit(TurnEvent::HitlApprovalRequired {
            approval_id: ticket.approval.id,
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let approval_id = ticket.approval.id;
        let decision = tokio::select! {
            _ = cancel.cancelled() => {
                // The turn is over; an unresolved row would keep counting as
                // a turn in progress. Record the refusal before returning.
                self.approvals.resolve(approval_id, ApprovalOutcome::Denied).await?;
                return Ok(None);
            }
            decision = self.approvals.wait(ticket) => decision?,
        };

        if decision.allows_execution() {
            Ok(invoke_detached(invoker, call, recorder, round, cancel).await)
        } else {
            let reason = match decision {
                ApprovalOutcome::Denied => "denied",
                ApprovalOutcome::TimedOut => "timed out",
                ApprovalOutcome::Approved => unreachable!("approved allows execution"),
            };
            Ok(Some(denied_result(call, reason)))
        }
    }

    /// Handle a `propose_tool` call through the proposal gate.
    async fn handle_proposal(
        &self,
        session_id: Uuid,
        call: &AgentToolCall,
        publisher: &EventPublisher,
        cancel: &CancellationToken,
    ) -> Result<Option<AgentToolResult>> {
        let name = call.arguments["name"].as_str().unwrap_or("unnamed").to_string();
        let description = call.arguments["description"].as_str().unwrap_or_default().to_string();
        let handler_type = call.arguments["handler_type"].as_str().unwrap_or("builtin").to_string();
        let parameters = call.arguments.get("parameters").cloned().unwrap_or(serde_json::json!({}));

        publisher.emit(TurnEvent::ToolGenerating { name: name.clone() });
        let ticket = self
            .proposals
            .open(session_id, &name, &description, &handler_type, parameters.clone())
            .await?;
        publisher.emit(TurnEvent::ToolProposal {
            proposal_id: ticket.proposal.id,
            name: name.clone(),
            handler_type,
            parameters,
        });

        let proposal_id = ticket.proposal.id;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                self.proposals.resolve(proposal_id, ProposalOutcome::Rejected).await?;
                return Ok(None);
            }
            outcome = self.proposals.wait(ticket) => outcome?,
        };
        let (label, is_error) = match outcome {
            ProposalOutcome::Approved => ("approved", false),
            ProposalOutcome::Rejected => ("rejected", true),
            ProposalOutcome::TimedOut => ("timed_out", true),
        };
        Ok(Some(AgentToolResult {
            tool_call_id: call.id.clone(),
            result: serde_json::json!({
                "proposal_id": proposal_id,
                "name": name,
                "outcome": label,
            }),
            is_error,
        }))
    }

    /// Persist the final assistant message, roll usage into the session, and
    /// emit the closing `usage` and `message_complete` events.
    #[allow(clippy::too_many_arguments)]
    async fn finish_turn(
        &self,
        session_id: Uuid,
        agent: &AgentDefinition,
        text: &str,
        reasoning: &str,
        usage: Option<Usage>,
        turn_usage: Usage,
        turn_started: Instant,
        tag: MessageTag,
        publisher: &EventPublisher,
    ) -> Result<ModelMessage> {
        let message = self
            .persist_assistant(
                session_id,
                agent,
                text,
                reasoning,
                Vec::new(),
                usage,
                turn_started,
                tag,
            )
            .await?;

        let session = self.store.add_session_usage(session_id, &turn_usage).await?;
        publisher.emit(TurnEvent::Usage {
            session_total_input: session.total_input_tokens,
            session_total_output: session.total_output_tokens,
        });
        publisher.emit(TurnEvent::MessageComplete {
            message: message.clone(),
        });
        Ok(message)
    }

    async fn persist_assistant(
        &self,
        session_id: Uuid,
        agent: &AgentDefinition,
        text: &str,
        reasoning: &str,
        tool_calls: Vec<ToolCallRecord>,
        usage: Option<Usage>,
        turn_started: Instant,
        tag: MessageTag,
    ) -> Result<ModelMessage> {
        let mut message = ModelMessage::assistant(text);
        if !reasoning.is_empty() {
            message.content.insert(
                0,
                ContentPart::Reasoning {
                    text: reasoning.to_string(),
                },
            );
        }
        let mut stored = StoredMessage::new(session_id, message.clone());
        stored.tool_calls = tool_calls;
        stored.metadata = MessageMetadata {
            model: Some(agent.model.to_string()),
            usage,
            latency_ms: Some(turn_started.elapsed().as_millis() as u64),
            agent_id: tag.agent_id,
            intermediate: tag.intermediate,
        };
        self.store.append_message(stored).await?;
        Ok(message)
    }
}

/// Invoke a tool on a detached task. On cancellation the task is left to run
/// to completion in the background, because tool side effects are not
/// revocable; `None` tells the caller the turn was canceled.
async fn invoke_detached(
    invoker: &ToolInvoker,
    call: &AgentToolCall,
    recorder: &TraceRecorder,
    round: usize,
    cancel: &CancellationToken,
) -> Option<AgentToolResult> {
    let span = recorder.begin(SpanKind::ToolCall, call.name.clone(), round);
    let task_invoker = invoker.clone();
    let task_call = call.clone();
    let handle = tokio::spawn(async move { task_invoker.invoke(&task_call).await });

    tokio::select! {
        _ = cancel.cancelled() => None,
        joined = handle => {
            let result = match joined {
                Ok(outcome) => outcome.result,
                Err(join_error) => AgentToolResult {
                    tool_call_id: call.id.clone(),
                    result: serde_json::json!({ "error": format!("tool task failed: {join_error}") }),
                    is_error: true,
                },
            };
            span.finish(None, !result.is_error).await;
            Some(result)
        }
    }
}
