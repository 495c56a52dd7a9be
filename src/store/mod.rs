//! Persistence seam: durable records and repository traits.
//!
//! The store is the engine's only shared mutable resource. Backends must
//! provide read-committed visibility and compare-and-set resolution of
//! approvals/proposals so a racing timeout and an explicit decision cannot
//! both win.

pub mod memory;
pub mod records;

pub use memory::InMemoryStore;
pub use records::*;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::Usage;

/// Session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> Result<()>;
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;
    /// Accumulate token usage onto the session counters.
    async fn add_session_usage(&self, id: Uuid, usage: &Usage) -> Result<Session>;
}

/// Message persistence. Messages are immutable once appended and ordered by
/// creation within a session.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, message: StoredMessage) -> Result<()>;
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<StoredMessage>>;
}

/// Pending approval persistence with compare-and-set resolution.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert_approval(&self, approval: PendingApproval) -> Result<()>;
    async fn get_approval(&self, id: Uuid) -> Result<Option<PendingApproval>>;
    /// The single outstanding unresolved approval for a session, if any.
    async fn open_approval_for_session(&self, session_id: Uuid) -> Result<Option<PendingApproval>>;
    /// Resolve the approval. Returns the final outcome plus whether this call
    /// performed the resolution (`false` means it was already resolved and
    /// the prior outcome is returned unchanged).
    async fn resolve_approval(
        &self,
        id: Uuid,
        outcome: ApprovalOutcome,
    ) -> Result<(ApprovalOutcome, bool)>;
    /// Deny every unresolved approval; used at process startup. Returns the
    /// ids that were denied.
    async fn deny_all_open_approvals(&self) -> Result<Vec<Uuid>>;
}

/// Tool proposal persistence; same lifecycle rules as approvals.
#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn insert_proposal(&self, proposal: ToolProposal) -> Result<()>;
    async fn get_proposal(&self, id: Uuid) -> Result<Option<ToolProposal>>;
    async fn resolve_proposal(
        &self,
        id: Uuid,
        outcome: ProposalOutcome,
    ) -> Result<(ProposalOutcome, bool)>;
    async fn reject_all_open_proposals(&self) -> Result<Vec<Uuid>>;
}

/// Workflow run persistence.
#[async_trait]
pub trait WorkflowRunStore: Send + Sync {
    async fn insert_run(&self, run: WorkflowRunRecord) -> Result<()>;
    async fn update_run(&self, run: WorkflowRunRecord) -> Result<()>;
    async fn get_run(&self, id: Uuid) -> Result<Option<WorkflowRunRecord>>;
}

/// Append-only trace span persistence.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn record_span(&self, span: TraceSpan) -> Result<()>;
    /// Spans for one owner, ordered by `(round, sequence)`.
    async fn spans_for_owner(&self, owner_id: Uuid) -> Result<Vec<TraceSpan>>;
}

/// Workflow schedule persistence.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn upsert_schedule(&self, schedule: WorkflowSchedule) -> Result<()>;
    async fn list_schedules(&self) -> Result<Vec<WorkflowSchedule>>;
    async fn mark_schedule_ran(
        &self,
        id: Uuid,
        last_run: chrono::DateTime<chrono::Utc>,
        next_run: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()>;
}

/// The full repository surface the engine depends on.
pub trait EngineStore:
    SessionStore
    + MessageStore
    + ApprovalStore
    + ProposalStore
    + WorkflowRunStore
    + TraceStore
    + ScheduleStore
{
}

impl<T> EngineStore for T where
    T: SessionStore
        + MessageStore
        + ApprovalStore
        + ProposalStore
        + WorkflowRunStore
        + TraceStore
        + ScheduleStore
{
}
