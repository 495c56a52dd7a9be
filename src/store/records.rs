//! Durable record shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ModelMessage, Usage};

/// What a session is bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRef {
    Agent { id: Uuid },
    Team { id: Uuid },
}

/// One conversation bound to exactly one agent or team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub entity: EntityRef,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn for_agent(agent_id: Uuid) -> Self {
        Self::new(EntityRef::Agent { id: agent_id })
    }

    pub fn for_team(team_id: Uuid) -> Self {
        Self::new(EntityRef::Team { id: team_id })
    }

    fn new(entity: EntityRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity,
            total_input_tokens: 0,
            total_output_tokens: 0,
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle of one tool call. Transitions exactly once from `Pending`
/// through `Running` to a terminal state; never re-entered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// Persisted tool call, attached to the message that requested it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub status: ToolCallStatus,
}

/// Per-message metadata (model id, token counts, latency).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Originating agent, for team-mode intermediate messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub intermediate: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A persisted message. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub message: ModelMessage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(session_id: Uuid, message: ModelMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            message,
            tool_calls: Vec::new(),
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }
}

/// Terminal outcome of a pending approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
}

impl ApprovalOutcome {
    /// Whether the gated tool call may execute.
    pub fn allows_execution(self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Suspension record for a flagged tool call awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub session_id: Uuid,
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Wall-clock deadline; survives process restarts.
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ApprovalOutcome>,
}

/// Terminal outcome of a tool proposal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalOutcome {
    Approved,
    Rejected,
    TimedOut,
}

/// Suspension record for agent-initiated tool creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProposal {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub description: String,
    /// Backend kind the proposed tool would use ("builtin", "http", "mcp").
    pub handler_type: String,
    pub parameters: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ProposalOutcome>,
}

/// Overall workflow run status. Terminal states are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Per-step status within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

/// Result of one executed (or skipped) workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepResult {
    pub node_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// One execution of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: WorkflowRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub step_results: Vec<WorkflowStepResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRunRecord {
    pub fn started(workflow_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: WorkflowRunStatus::Running,
            output: None,
            error: None,
            step_results: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// What a trace span measured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    LlmCall,
    ToolCall,
    McpCall,
    WorkflowStep,
}

/// Append-only record of one unit of execution; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSpan {
    pub id: Uuid,
    /// Session or workflow run this span belongs to.
    pub owner_id: Uuid,
    pub kind: SpanKind,
    pub name: String,
    pub round: usize,
    pub sequence: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub ok: bool,
    pub created_at: DateTime<Utc>,
}

/// A cron-scheduled workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSchedule {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub cron: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}
