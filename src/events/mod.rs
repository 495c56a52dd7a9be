//! Session-scoped event stream.
//!
//! Every engine surface (turn, team, workflow) publishes into one ordered,
//! per-session sequence terminated by exactly one `done` or `error`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::knowledge::ContextSnippet;
use crate::types::ModelMessage;

/// Team-mode progress phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStepPhase {
    Routing,
    Selected,
    Responding,
    Completed,
    Synthesizing,
}

/// Workflow step progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Started,
    Completed,
    Failed,
    Skipped,
}

/// Events emitted while driving a turn or run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    ContentDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        round: usize,
        max_rounds: usize,
    },
    ToolCallResult {
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
        is_error: bool,
    },
    AgentStep {
        phase: AgentStepPhase,
        /// Absent for team-level phases (routing, synthesizing).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<Uuid>,
        agent_name: String,
    },
    KbContext {
        kb_name: String,
        snippets: Vec<ContextSnippet>,
    },
    KbNotIndexedWarning {
        kb_name: String,
        message: String,
    },
    HitlApprovalRequired {
        approval_id: Uuid,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolProposal {
        proposal_id: Uuid,
        name: String,
        handler_type: String,
        parameters: serde_json::Value,
    },
    ToolGenerating {
        name: String,
    },
    ArtifactEvent {
        id: String,
        title: String,
        artifact_type: String,
        content: String,
        is_complete: bool,
    },
    ContextCompacted {
        messages_summarized: usize,
    },
    Usage {
        session_total_input: u64,
        session_total_output: u64,
    },
    MessageComplete {
        message: ModelMessage,
    },
    WorkflowStep {
        node_id: String,
        phase: StepPhase,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    Done,
}

impl TurnEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Envelope for a published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: TurnEvent,
}

struct PublisherState {
    seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

/// Ordered, session-scoped event publisher.
///
/// Sequencing and fan-out happen under one lock so every subscriber observes
/// the same order. After the first terminal event, further events are
/// dropped; the stream ends with exactly one `done` or `error`.
pub struct EventPublisher {
    session_id: Uuid,
    state: Mutex<PublisherState>,
    terminated: AtomicBool,
}

impl EventPublisher {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            state: Mutex::new(PublisherState {
                seq: 0,
                subscribers: Vec::new(),
            }),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Subscribe to the stream. Events emitted before subscription are not
    /// replayed; observers re-fetch persisted state on reconnect.
    pub fn subscribe(&self) -> UnboundedReceiverStream<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Publish one event to all subscribers, in order.
    pub fn emit(&self, event: TurnEvent) {
        if self.terminated.load(Ordering::SeqCst) {
            tracing::debug!(session_id = %self.session_id, "event after terminal, dropped");
            return;
        }
        let terminal = event.is_terminal();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.seq += 1;
        let envelope = SessionEvent {
            session_id: self.session_id,
            seq: state.seq,
            timestamp: Utc::now(),
            event,
        };
        state.subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());

        if terminal {
            self.terminated.store(true, Ordering::SeqCst);
            state.subscribers.clear();
        }
    }
}
