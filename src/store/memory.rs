//! In-memory store backend.
//!
//! Default backend for tests and single-process deployments. Each table is
//! guarded independently; approval/proposal resolution is compare-and-set
//! under the table lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::types::Usage;

use super::records::*;
use super::{
    ApprovalStore, MessageStore, ProposalStore, ScheduleStore, SessionStore, TraceStore,
    WorkflowRunStore,
};

/// In-memory implementation of every repository trait.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    messages: RwLock<Vec<StoredMessage>>,
    approvals: RwLock<HashMap<Uuid, PendingApproval>>,
    proposals: RwLock<HashMap<Uuid, ToolProposal>>,
    runs: RwLock<HashMap<Uuid, WorkflowRunRecord>>,
    spans: RwLock<Vec<TraceSpan>>,
    schedules: RwLock<HashMap<Uuid, WorkflowSchedule>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: Session) -> Result<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn add_session_usage(&self, id: Uuid, usage: &Usage) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(EngineError::SessionNotFound(id))?;
        session.total_input_tokens += usage.input_tokens;
        session.total_output_tokens += usage.output_tokens;
        Ok(session.clone())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append_message(&self, message: StoredMessage) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ApprovalStore for InMemoryStore {
    async fn insert_approval(&self, approval: PendingApproval) -> Result<()> {
        self.approvals.write().await.insert(approval.id, approval);
        Ok(())
    }

    async fn get_approval(&self, id: Uuid) -> Result<Option<PendingApproval>> {
        Ok(self.approvals.read().await.get(&id).cloned())
    }

    async fn open_approval_for_session(&self, session_id: Uuid) -> Result<Option<PendingApproval>> {
        Ok(self
            .approvals
            .read()
            .await
            .values()
            .find(|a| a.session_id == session_id && a.resolution.is_none())
            .cloned())
    }

    async fn resolve_approval(
        &self,
        id: Uuid,
        outcome: ApprovalOutcome,
    ) -> Result<(ApprovalOutcome, bool)> {
        let mut approvals = self.approvals.write().await;
        let approval = approvals
            .get_mut(&id)
            .ok_or_else(|| EngineError::Storage(format!("approval {id} not found")))?;
        match approval.resolution {
            Some(prior) => Ok((prior, false)),
            None => {
                approval.resolution = Some(outcome);
                Ok((outcome, true))
            }
        }
    }

    async fn deny_all_open_approvals(&self) -> Result<Vec<Uuid>> {
        let mut approvals = self.approvals.write().await;
        let mut denied = Vec::new();
        for approval in approvals.values_mut() {
            if approval.resolution.is_none() {
                approval.resolution = Some(ApprovalOutcome::Denied);
                denied.push(approval.id);
            }
        }
        Ok(denied)
    }
}

#[async_trait]
impl ProposalStore for InMemoryStore {
    async fn insert_proposal(&self, proposal: ToolProposal) -> Result<()> {
        self.proposals.write().await.insert(proposal.id, proposal);
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<ToolProposal>> {
        Ok(self.proposals.read().await.get(&id).cloned())
    }

    async fn resolve_proposal(
        &self,
        id: Uuid,
        outcome: ProposalOutcome,
    ) -> Result<(ProposalOutcome, bool)> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| EngineError::Storage(format!("proposal {id} not found")))?;
        match proposal.resolution {
            Some(prior) => Ok((prior, false)),
            None => {
                proposal.resolution = Some(outcome);
                Ok((outcome, true))
            }
        }
    }

    async fn reject_all_open_proposals(&self) -> Result<Vec<Uuid>> {
        let mut proposals = self.proposals.write().await;
        let mut rejected = Vec::new();
        for proposal in proposals.values_mut() {
            if proposal.resolution.is_none() {
                proposal.resolution = Some(ProposalOutcome::Rejected);
                rejected.push(proposal.id);
            }
        }
        Ok(rejected)
    }
}

#[async_trait]
impl WorkflowRunStore for InMemoryStore {
    async fn insert_run(&self, run: WorkflowRunRecord) -> Result<()> {
        self.runs.write().await.insert(run.id, run);
        Ok(())
    }

    async fn update_run(&self, run: WorkflowRunRecord) -> Result<()> {
        self.runs.write().await.insert(run.id, run);
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<WorkflowRunRecord>> {
        Ok(self.runs.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl TraceStore for InMemoryStore {
    async fn record_span(&self, span: TraceSpan) -> Result<()> {
        self.spans.write().await.push(span);
        Ok(())
    }

    async fn spans_for_owner(&self, owner_id: Uuid) -> Result<Vec<TraceSpan>> {
        let mut spans: Vec<TraceSpan> = self
            .spans
            .read()
            .await
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        spans.sort_by_key(|s| (s.round, s.sequence));
        Ok(spans)
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn upsert_schedule(&self, schedule: WorkflowSchedule) -> Result<()> {
        self.schedules.write().await.insert(schedule.id, schedule);
        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<WorkflowSchedule>> {
        Ok(self.schedules.read().await.values().cloned().collect())
    }

    async fn mark_schedule_ran(
        &self,
        id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(&id)
            .ok_or_else(|| EngineError::Storage(format!("schedule {id} not found")))?;
        schedule.last_run = Some(last_run);
        schedule.next_run = next_run;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(session_id: Uuid) -> PendingApproval {
        PendingApproval {
            id: Uuid::new_v4(),
            session_id,
            tool_call_id: "call_1".to_string(),
            tool_name: "delete_file".to_string(),
            arguments: serde_json::json!({"path": "/tmp/x"}),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(10),
            resolution: None,
        }
    }

    #[tokio::test]
    async fn resolve_approval_is_compare_and_set() {
        let store = InMemoryStore::new();
        let a = approval(Uuid::new_v4());
        let id = a.id;
        store.insert_approval(a).await.unwrap();

        let (first, won_first) = store
            .resolve_approval(id, ApprovalOutcome::Approved)
            .await
            .unwrap();
        assert_eq!(first, ApprovalOutcome::Approved);
        assert!(won_first);

        // A racing timeout cannot overwrite the decision.
        let (second, won_second) = store
            .resolve_approval(id, ApprovalOutcome::TimedOut)
            .await
            .unwrap();
        assert_eq!(second, ApprovalOutcome::Approved);
        assert!(!won_second);
    }

    #[tokio::test]
    async fn deny_all_open_skips_resolved_rows() {
        let store = InMemoryStore::new();
        let resolved = approval(Uuid::new_v4());
        let resolved_id = resolved.id;
        let open = approval(Uuid::new_v4());
        let open_id = open.id;
        store.insert_approval(resolved).await.unwrap();
        store.insert_approval(open).await.unwrap();
        store
            .resolve_approval(resolved_id, ApprovalOutcome::Approved)
            .await
            .unwrap();

        let denied = store.deny_all_open_approvals().await.unwrap();
        assert_eq!(denied, vec![open_id]);

        let row = store.get_approval(resolved_id).await.unwrap().unwrap();
        assert_eq!(row.resolution, Some(ApprovalOutcome::Approved));
    }

    #[tokio::test]
    async fn messages_keep_insertion_order_per_session() {
        let store = InMemoryStore::new();
        let session = Uuid::new_v4();
        let other = Uuid::new_v4();
        for text in ["one", "two", "three"] {
            store
                .append_message(StoredMessage::new(
                    session,
                    crate::types::ModelMessage::user(text),
                ))
                .await
                .unwrap();
        }
        store
            .append_message(StoredMessage::new(
                other,
                crate::types::ModelMessage::user("elsewhere"),
            ))
            .await
            .unwrap();

        let messages = store.list_messages(session).await.unwrap();
        let texts: Vec<String> = messages.iter().map(|m| m.message.text()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn spans_sort_by_round_then_sequence() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        for (round, seq) in [(2usize, 1u64), (1, 2), (1, 1)] {
            store
                .record_span(TraceSpan {
                    id: Uuid::new_v4(),
                    owner_id: owner,
                    kind: SpanKind::ToolCall,
                    name: format!("span-{round}-{seq}"),
                    round,
                    sequence: seq,
                    duration_ms: 5,
                    usage: None,
                    ok: true,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let spans = store.spans_for_owner(owner).await.unwrap();
        let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["span-1-1", "span-1-2", "span-2-1"]);
    }
}
