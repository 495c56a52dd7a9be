//! Runtime facade: sessions, turn lifecycle, resolution endpoints, and the
//! process-wide scheduler.
//!
//! The runtime enforces the single-writer rule: within one session, turns
//! are strictly serialized, and a turn suspended on an approval still counts
//! as in progress. Across sessions execution is fully concurrent; the store
//! is the only shared mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentDefinition, TeamDefinition};
use crate::approval::{ApprovalGate, ProposalGate};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventPublisher, SessionEvent, TurnEvent};
use crate::models::LanguageModel;
use crate::provider::{ModelProvider, ProviderRegistry};
use crate::schedule::{ScheduleHandler, ScheduleService};
use crate::store::{
    ApprovalOutcome, ApprovalStore, EngineStore, PendingApproval, ProposalOutcome, ProposalStore,
    Session, TraceStore, WorkflowRunRecord, WorkflowSchedule,
};
use crate::team::TeamRouter;
use crate::turn::{TurnEngine, TurnInput};
use crate::workflow::{WorkflowDefinition, WorkflowExecutor, WorkflowGraph};

/// A running workflow: its event stream, a cancel handle, and the terminal
/// run record.
pub struct WorkflowHandle {
    pub events: UnboundedReceiverStream<SessionEvent>,
    pub cancel: CancellationToken,
    pub result: JoinHandle<Result<WorkflowRunRecord>>,
}

struct ActiveTurn {
    cancel: CancellationToken,
}

type WorkflowMap = Arc<RwLock<HashMap<Uuid, WorkflowDefinition>>>;

/// Entry point for driving agents, teams, and workflows.
pub struct Runtime {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn EngineStore>,
    engine: Arc<TurnEngine>,
    router: Arc<TeamRouter>,
    executor: Arc<WorkflowExecutor>,
    approvals: Arc<ApprovalGate>,
    proposals: Arc<ProposalGate>,
    scheduler: Arc<ScheduleService>,
    workflows: WorkflowMap,
    active: Arc<Mutex<HashMap<Uuid, ActiveTurn>>>,
}

impl Runtime {
    pub fn new<S>(config: EngineConfig, registry: Arc<ProviderRegistry>, store: Arc<S>) -> Self
    where
        S: EngineStore + 'static,
    {
        let store_dyn: Arc<dyn EngineStore> = store.clone();
        let trace_store: Arc<dyn TraceStore> = store.clone();
        let approval_store: Arc<dyn ApprovalStore> = store.clone();
        let proposal_store: Arc<dyn ProposalStore> = store.clone();
        let schedule_store: Arc<dyn crate::store::ScheduleStore> = store.clone();

        let approvals = Arc::new(ApprovalGate::new(approval_store, config.approval_timeout));
        let proposals = Arc::new(ProposalGate::new(proposal_store, config.approval_timeout));
        let engine = Arc::new(TurnEngine::new(
            config.clone(),
            store_dyn.clone(),
            trace_store.clone(),
            approvals.clone(),
            proposals.clone(),
        ));
        let router = Arc::new(TeamRouter::new(
            config.clone(),
            registry.clone(),
            store_dyn.clone(),
            engine.clone(),
        ));
        let executor = Arc::new(WorkflowExecutor::new(
            config.clone(),
            registry.clone(),
            store_dyn.clone(),
            trace_store,
            engine.clone(),
        ));
        let workflows: WorkflowMap = Arc::new(RwLock::new(HashMap::new()));
        let scheduler = Arc::new(ScheduleService::new(
            schedule_store,
            Arc::new(ScheduledWorkflowHandler {
                executor: executor.clone(),
                workflows: workflows.clone(),
            }),
        ));

        Self {
            config,
            registry,
            store: store_dyn,
            engine,
            router,
            executor,
            approvals,
            proposals,
            scheduler,
            workflows,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Startup recovery plus scheduler init. Approvals and proposals left
    /// open by a previous process lifetime are refused before any new turn
    /// can begin; persisted schedules are rebuilt with missed runs skipped.
    pub async fn start(&self) -> Result<()> {
        self.approvals.deny_orphans().await?;
        self.proposals.reject_orphans().await?;
        self.scheduler.start().await?;
        Ok(())
    }

    /// Cancel the scheduler. Turns in flight are left to their own tokens.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub async fn create_session(&self, agent: &AgentDefinition) -> Result<Uuid> {
        let session = Session::for_agent(agent.id);
        let id = session.id;
        self.store.insert_session(session).await?;
        Ok(id)
    }

    pub async fn create_team_session(&self, team: &TeamDefinition) -> Result<Uuid> {
        let session = Session::for_team(team.id);
        let id = session.id;
        self.store.insert_session(session).await?;
        Ok(id)
    }

    /// Start a turn for a single agent. Returns the session's ordered event
    /// stream; the turn runs on its own task.
    pub async fn start_turn(
        &self,
        agent: &AgentDefinition,
        session_id: Uuid,
        input: TurnInput,
    ) -> Result<UnboundedReceiverStream<SessionEvent>> {
        let provider = self.provider_for(&agent.model)?;
        let (publisher, events, cancel) = self.begin_turn(session_id).await?;

        let engine = self.engine.clone();
        let agent = agent.clone();
        let active = self.active.clone();
        let task_publisher = publisher.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = engine
                .run(
                    session_id,
                    &agent,
                    provider,
                    input,
                    task_publisher.clone(),
                    task_cancel,
                )
                .await;
            finish(session_id, outcome.map(|_| ()), &task_publisher, &active).await;
        });
        Ok(events)
    }

    /// Start a turn for a team, delegating per the team's mode.
    pub async fn start_team_turn(
        &self,
        team: &TeamDefinition,
        session_id: Uuid,
        input: TurnInput,
    ) -> Result<UnboundedReceiverStream<SessionEvent>> {
        if team.agents.is_empty() {
            return Err(EngineError::InvalidArgument(
                "team has no members".to_string(),
            ));
        }
        let (publisher, events, cancel) = self.begin_turn(session_id).await?;

        let router = self.router.clone();
        let team = team.clone();
        let active = self.active.clone();
        let task_publisher = publisher.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = router
                .run(session_id, &team, input, task_publisher.clone(), task_cancel)
                .await;
            finish(session_id, outcome.map(|_| ()), &task_publisher, &active).await;
        });
        Ok(events)
    }

    /// Cancel an in-flight turn. Already-dispatched tool calls finish in the
    /// background; partial text is persisted by the turn task.
    pub async fn cancel_turn(&self, session_id: Uuid) -> bool {
        match self.active.lock().await.get(&session_id) {
            Some(turn) => {
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a workflow to completion, validating the DAG up front.
    pub async fn run_workflow(
        &self,
        workflow: &WorkflowDefinition,
        input: &str,
    ) -> Result<WorkflowRunRecord> {
        let publisher = Arc::new(EventPublisher::new(workflow.id));
        self.executor
            .run(workflow, input, publisher, CancellationToken::new())
            .await
    }

    /// Run a workflow on its own task, streaming per-step events.
    pub async fn start_workflow(
        &self,
        workflow: WorkflowDefinition,
        input: String,
    ) -> Result<WorkflowHandle> {
        // Reject invalid DAGs before anything runs.
        WorkflowGraph::validate(&workflow)?;

        let publisher = Arc::new(EventPublisher::new(workflow.id));
        let events = publisher.subscribe();
        let cancel = CancellationToken::new();

        let executor = self.executor.clone();
        let task_publisher = publisher.clone();
        let task_cancel = cancel.clone();
        let result = tokio::spawn(async move {
            let outcome = executor
                .run(&workflow, &input, task_publisher.clone(), task_cancel)
                .await;
            match &outcome {
                Ok(_) => task_publisher.emit(TurnEvent::Done),
                Err(error) => task_publisher.emit(TurnEvent::Error {
                    message: error.to_string(),
                }),
            }
            outcome
        });
        Ok(WorkflowHandle {
            events,
            cancel,
            result,
        })
    }

    /// Register a workflow definition so schedules can reference it.
    pub async fn register_workflow(&self, workflow: WorkflowDefinition) -> Result<Uuid> {
        WorkflowGraph::validate(&workflow)?;
        let id = workflow.id;
        self.workflows.write().await.insert(id, workflow);
        Ok(id)
    }

    /// Bind a registered workflow to a cron expression.
    pub async fn schedule_workflow(
        &self,
        workflow_id: Uuid,
        cron_expr: &str,
    ) -> Result<WorkflowSchedule> {
        if !self.workflows.read().await.contains_key(&workflow_id) {
            return Err(EngineError::InvalidArgument(format!(
                "workflow {workflow_id} is not registered"
            )));
        }
        self.scheduler.register(workflow_id, cron_expr).await
    }

    /// Resolve a pending approval. Idempotent: resolving an already-resolved
    /// id returns the prior outcome.
    pub async fn resolve_approval(&self, id: Uuid, approve: bool) -> Result<ApprovalOutcome> {
        let outcome = if approve {
            ApprovalOutcome::Approved
        } else {
            ApprovalOutcome::Denied
        };
        self.approvals.resolve(id, outcome).await
    }

    /// Resolve a pending tool proposal. Idempotent like approvals.
    pub async fn resolve_proposal(&self, id: Uuid, approve: bool) -> Result<ProposalOutcome> {
        let outcome = if approve {
            ProposalOutcome::Approved
        } else {
            ProposalOutcome::Rejected
        };
        self.proposals.resolve(id, outcome).await
    }

    /// The single outstanding approval for a session, for re-connecting
    /// observers to re-render.
    pub async fn open_approval(&self, session_id: Uuid) -> Result<Option<PendingApproval>> {
        self.store.open_approval_for_session(session_id).await
    }

    /// Session-scoped setup shared by agent and team turns: single-writer
    /// check, publisher, and active-turn registration.
    async fn begin_turn(
        &self,
        session_id: Uuid,
    ) -> Result<(
        Arc<EventPublisher>,
        UnboundedReceiverStream<SessionEvent>,
        CancellationToken,
    )> {
        if self.store.get_session(session_id).await?.is_none() {
            return Err(EngineError::SessionNotFound(session_id));
        }

        let mut active = self.active.lock().await;
        if active.contains_key(&session_id) {
            return Err(EngineError::TurnInProgress(session_id));
        }
        // A turn suspended on an approval is still a turn in progress, even
        // if this process no longer holds its task.
        if self
            .store
            .open_approval_for_session(session_id)
            .await?
            .is_some()
        {
            return Err(EngineError::TurnInProgress(session_id));
        }

        let publisher = Arc::new(EventPublisher::new(session_id));
        let events = publisher.subscribe();
        let cancel = CancellationToken::new();
        active.insert(
            session_id,
            ActiveTurn {
                cancel: cancel.clone(),
            },
        );
        Ok((publisher, events, cancel))
    }

    fn provider_for(&self, model: &LanguageModel) -> Result<Arc<dyn ModelProvider>> {
        self.registry
            .create_provider(&model.provider, &model.model_id, &self.config)
            .map(Arc::from)
    }
}

/// Emit the terminal event and release the session's writer slot.
async fn finish(
    session_id: Uuid,
    outcome: Result<()>,
    publisher: &EventPublisher,
    active: &Mutex<HashMap<Uuid, ActiveTurn>>,
) {
    match outcome {
        Ok(()) => publisher.emit(TurnEvent::Done),
        Err(error) => {
            tracing::error!(session_id = %session_id, %error, "turn failed");
            publisher.emit(TurnEvent::Error {
                message: error.to_string(),
            });
        }
    }
    active.lock().await.remove(&session_id);
}

struct ScheduledWorkflowHandler {
    executor: Arc<WorkflowExecutor>,
    workflows: WorkflowMap,
}

#[async_trait]
impl ScheduleHandler for ScheduledWorkflowHandler {
    async fn run_scheduled(&self, workflow_id: Uuid) {
        let workflow = self.workflows.read().await.get(&workflow_id).cloned();
        let Some(workflow) = workflow else {
            tracing::warn!(%workflow_id, "scheduled workflow is not registered");
            return;
        };
        let publisher = Arc::new(EventPublisher::new(workflow.id));
        if let Err(error) = self
            .executor
            .run(&workflow, "", publisher, CancellationToken::new())
            .await
        {
            tracing::error!(%workflow_id, %error, "scheduled workflow run failed");
        }
    }
}
