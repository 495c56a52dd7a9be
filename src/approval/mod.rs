//! Human-in-the-loop gates.
//!
//! A flagged tool call suspends the turn until a human approves or denies
//! it, or the wall-clock deadline passes. Decisions are persisted with
//! compare-and-set semantics, so a racing timeout and an explicit decision
//! resolve to exactly one outcome and repeated resolution calls are
//! idempotent. The deadline is stored as an absolute timestamp; a process
//! that restarts mid-wait denies the row during startup recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::store::{
    ApprovalOutcome, ApprovalStore, PendingApproval, ProposalOutcome, ProposalStore, ToolProposal,
};
use crate::types::AgentToolCall;

/// Gate for approval-flagged tool calls.
pub struct ApprovalGate {
    store: Arc<dyn ApprovalStore>,
    timeout: Duration,
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<ApprovalOutcome>>>,
}

impl ApprovalGate {
    pub fn new(store: Arc<dyn ApprovalStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a pending approval for a flagged call and register a waiter.
    /// The turn task holds the returned ticket and awaits the decision.
    pub async fn open(
        &self,
        session_id: Uuid,
        call: &AgentToolCall,
    ) -> Result<ApprovalTicket> {
        let now = Utc::now();
        let approval = PendingApproval {
            id: Uuid::new_v4(),
            session_id,
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.timeout).unwrap_or_default(),
            resolution: None,
        };
        self.store.insert_approval(approval.clone()).await?;

        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(approval.id, tx);

        tracing::info!(
            approval_id = %approval.id,
            session_id = %session_id,
            tool = %call.name,
            "tool call suspended for approval"
        );
        Ok(ApprovalTicket { approval, rx })
    }

    /// Block until the approval is decided or its deadline passes. A timeout
    /// is itself resolved through the store, so an explicit decision that
    /// raced ahead of it wins.
    pub async fn wait(&self, ticket: ApprovalTicket) -> Result<ApprovalOutcome> {
        let remaining = (ticket.approval.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        match tokio::time::timeout(remaining, ticket.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            // Waiter dropped without a decision; read the persisted row.
            Ok(Err(_)) => {
                let (outcome, _) = self
                    .store
                    .resolve_approval(ticket.approval.id, ApprovalOutcome::Denied)
                    .await?;
                Ok(outcome)
            }
            Err(_) => {
                self.waiters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&ticket.approval.id);
                let (outcome, timed_out_now) = self
                    .store
                    .resolve_approval(ticket.approval.id, ApprovalOutcome::TimedOut)
                    .await?;
                if timed_out_now {
                    tracing::info!(approval_id = %ticket.approval.id, "approval timed out");
                }
                Ok(outcome)
            }
        }
    }

    /// Record a human decision. Idempotent: the first resolution wins and
    /// later calls return that outcome unchanged.
    pub async fn resolve(&self, id: Uuid, outcome: ApprovalOutcome) -> Result<ApprovalOutcome> {
        if self.store.get_approval(id).await?.is_none() {
            return Err(EngineError::Storage(format!("approval {id} not found")));
        }
        let (decided, newly) = self.store.resolve_approval(id, outcome).await?;
        if newly {
            let waiter = self
                .waiters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            if let Some(tx) = waiter {
                let _ = tx.send(decided);
            }
        }
        Ok(decided)
    }

    /// Startup recovery: deny every approval left unresolved by a previous
    /// process. In-flight turns did not survive the restart, so the safe
    /// decision is to refuse them.
    pub async fn deny_orphans(&self) -> Result<usize> {
        let denied = self.store.deny_all_open_approvals().await?;
        if !denied.is_empty() {
            tracing::warn!(count = denied.len(), "denied orphaned approvals at startup");
        }
        Ok(denied.len())
    }
}

/// Handle for one suspended tool call.
pub struct ApprovalTicket {
    pub approval: PendingApproval,
    rx: oneshot::Receiver<ApprovalOutcome>,
}

/// Gate for agent-initiated tool proposals. Same lifecycle as approvals.
pub struct ProposalGate {
    store: Arc<dyn ProposalStore>,
    timeout: Duration,
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<ProposalOutcome>>>,
}

impl ProposalGate {
    pub fn new(store: Arc<dyn ProposalStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open(
        &self,
        session_id: Uuid,
        name: impl Into<String>,
        description: impl Into<String>,
        handler_type: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Result<ProposalTicket> {
        let now = Utc::now();
        let proposal = ToolProposal {
            id: Uuid::new_v4(),
            session_id,
            name: name.into(),
            description: description.into(),
            handler_type: handler_type.into(),
            parameters,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.timeout).unwrap_or_default(),
            resolution: None,
        };
        self.store.insert_proposal(proposal.clone()).await?;

        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(proposal.id, tx);
        Ok(ProposalTicket { proposal, rx })
    }

    pub async fn wait(&self, ticket: ProposalTicket) -> Result<ProposalOutcome> {
        let remaining = (ticket.proposal.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        match tokio::time::timeout(remaining, ticket.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => {
                let (outcome, _) = self
                    .store
                    .resolve_proposal(ticket.proposal.id, ProposalOutcome::Rejected)
                    .await?;
                Ok(outcome)
            }
            Err(_) => {
                self.waiters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&ticket.proposal.id);
                let (outcome, _) = self
                    .store
                    .resolve_proposal(ticket.proposal.id, ProposalOutcome::TimedOut)
                    .await?;
                Ok(outcome)
            }
        }
    }

    pub async fn resolve(&self, id: Uuid, outcome: ProposalOutcome) -> Result<ProposalOutcome> {
        if self.store.get_proposal(id).await?.is_none() {
            return Err(EngineError::Storage(format!("proposal {id} not found")));
        }
        let (decided, newly) = self.store.resolve_proposal(id, outcome).await?;
        if newly {
            let waiter = self
                .waiters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            if let Some(tx) = waiter {
                let _ = tx.send(decided);
            }
        }
        Ok(decided)
    }

    pub async fn reject_orphans(&self) -> Result<usize> {
        let rejected = self.store.reject_all_open_proposals().await?;
        if !rejected.is_empty() {
            tracing::warn!(count = rejected.len(), "rejected orphaned proposals at startup");
        }
        Ok(rejected.len())
    }
}

/// Handle for one pending tool proposal.
pub struct ProposalTicket {
    pub proposal: ToolProposal,
    rx: oneshot::Receiver<ProposalOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn call() -> AgentToolCall {
        AgentToolCall {
            id: "call_1".to_string(),
            name: "delete_file".to_string(),
            arguments: json!({"path": "/tmp/x"}),
        }
    }

    #[tokio::test]
    async fn explicit_approval_unblocks_waiter() {
        let store = Arc::new(InMemoryStore::new());
        let gate = Arc::new(ApprovalGate::new(store, Duration::from_secs(600)));

        let ticket = gate.open(Uuid::new_v4(), &call()).await.unwrap();
        let id = ticket.approval.id;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(ticket).await })
        };
        tokio::task::yield_now().await;

        let decided = gate.resolve(id, ApprovalOutcome::Approved).await.unwrap();
        assert_eq!(decided, ApprovalOutcome::Approved);
        assert_eq!(waiter.await.unwrap().unwrap(), ApprovalOutcome::Approved);
    }

    #[tokio::test]
    async fn second_resolution_returns_first_outcome() {
        let store = Arc::new(InMemoryStore::new());
        let gate = ApprovalGate::new(store, Duration::from_secs(600));

        let ticket = gate.open(Uuid::new_v4(), &call()).await.unwrap();
        let id = ticket.approval.id;

        let first = gate.resolve(id, ApprovalOutcome::Denied).await.unwrap();
        let second = gate.resolve(id, ApprovalOutcome::Approved).await.unwrap();
        assert_eq!(first, ApprovalOutcome::Denied);
        assert_eq!(second, ApprovalOutcome::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_to_timed_out() {
        let store = Arc::new(InMemoryStore::new());
        let gate = Arc::new(ApprovalGate::new(store.clone(), Duration::from_secs(600)));

        let ticket = gate.open(Uuid::new_v4(), &call()).await.unwrap();
        let id = ticket.approval.id;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(ticket).await })
        };
        tokio::time::advance(Duration::from_secs(601)).await;

        assert_eq!(waiter.await.unwrap().unwrap(), ApprovalOutcome::TimedOut);
        let row = store.get_approval(id).await.unwrap().unwrap();
        assert_eq!(row.resolution, Some(ApprovalOutcome::TimedOut));
    }

    #[tokio::test]
    async fn resolving_unknown_approval_fails() {
        let store = Arc::new(InMemoryStore::new());
        let gate = ApprovalGate::new(store, Duration::from_secs(600));
        let err = gate
            .resolve(Uuid::new_v4(), ApprovalOutcome::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }

    #[tokio::test]
    async fn startup_sweep_denies_open_rows() {
        let store = Arc::new(InMemoryStore::new());
        let gate = ApprovalGate::new(store.clone(), Duration::from_secs(600));

        let a = gate.open(Uuid::new_v4(), &call()).await.unwrap();
        let b = gate.open(Uuid::new_v4(), &call()).await.unwrap();
        gate.resolve(a.approval.id, ApprovalOutcome::Approved)
            .await
            .unwrap();

        let denied = gate.deny_orphans().await.unwrap();
        assert_eq!(denied, 1);
        let row = store.get_approval(b.approval.id).await.unwrap().unwrap();
        assert_eq!(row.resolution, Some(ApprovalOutcome::Denied));
    }
}
