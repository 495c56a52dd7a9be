//! Readiness-driven workflow execution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentDefinition;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{EventPublisher, StepPhase, TurnEvent};
use crate::models::LanguageModel;
use crate::provider::{ModelProvider, ProviderRegistry, ProviderRequest};
use crate::store::{
    EngineStore, Session, SpanKind, StepStatus, TraceStore, WorkflowRunRecord, WorkflowRunStatus,
    WorkflowStepResult,
};
use crate::trace::TraceRecorder;
use crate::turn::{TurnEngine, TurnInput};
use crate::types::{GenerationSettings, ModelMessage};

use super::graph::WorkflowGraph;
use super::{NodeKind, WorkflowDefinition};

/// What one node produced.
enum NodeOutcome {
    /// Output text, passed downstream.
    Text(String),
    /// A condition's selected branch plus its pass-through input.
    Branch { selected: String, input: String },
}

type StepDone = (String, DateTime<Utc>, Result<NodeOutcome>);

/// Executes validated workflow DAGs.
pub struct WorkflowExecutor {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn EngineStore>,
    trace_store: Arc<dyn TraceStore>,
    engine: Arc<TurnEngine>,
}

impl WorkflowExecutor {
    pub fn new(
        config: EngineConfig,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn EngineStore>,
        trace_store: Arc<dyn TraceStore>,
        engine: Arc<TurnEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            trace_store,
            engine,
        }
    }

    /// Run a workflow to a terminal [`WorkflowRunRecord`].
    ///
    /// The DAG is validated before the run record is created; validation
    /// failures never leave a partial run behind. Independent ready nodes run
    /// concurrently; a node with several upstream edges waits for all of them.
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        input_text: &str,
        publisher: Arc<EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRunRecord> {
        let graph = WorkflowGraph::validate(workflow)?;
        let placeholder =
            Regex::new(r"\{\{([A-Za-z0-9_\-]+)\.output\}\}").expect("valid literal regex");

        let mut run = WorkflowRunRecord::started(workflow.id);
        self.store.insert_run(run.clone()).await?;
        let recorder = TraceRecorder::new(self.trace_store.clone(), run.id);

        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut running: HashSet<String> = HashSet::new();
        let mut pruned_edges: HashSet<usize> = HashSet::new();
        let mut failure: Option<String> = None;
        let mut cancelled = false;
        let mut in_flight: FuturesUnordered<BoxFuture<'_, StepDone>> = FuturesUnordered::new();

        // The start node seeds its successors and produces no agent output.
        let seed = match &graph
            .node(graph.start_id())
            .map(|n| &n.kind)
        {
            Some(NodeKind::Start { seed: Some(text) }) => text.clone(),
            _ => input_text.to_string(),
        };
        outputs.insert(graph.start_id().to_string(), seed);
        completed.insert(graph.start_id().to_string());

        loop {
            // Schedule everything that became ready, and skip everything
            // whose every upstream path was pruned.
            let mut progressed = true;
            while progressed {
                progressed = false;
                for id in graph.node_ids() {
                    if completed.contains(id)
                        || skipped.contains(id)
                        || running.contains(id)
                        || id == graph.start_id()
                    {
                        continue;
                    }
                    let mut live_pending = false;
                    let mut live_inputs: Vec<&str> = Vec::new();
                    for &edge_index in graph.incoming(id) {
                        let edge = graph.edge(edge_index);
                        if pruned_edges.contains(&edge_index)
                            || skipped.contains(&edge.from)
                            || failed.contains(&edge.from)
                        {
                            continue; // dead path
                        }
                        match outputs.get(&edge.from) {
                            Some(output) if completed.contains(&edge.from) => {
                                live_inputs.push(output)
                            }
                            _ => live_pending = true,
                        }
                    }
                    if live_pending {
                        continue;
                    }
                    if live_inputs.is_empty() {
                        skipped.insert(id.to_string());
                        run.step_results.push(skipped_step(id));
                        publisher.emit(TurnEvent::WorkflowStep {
                            node_id: id.to_string(),
                            phase: StepPhase::Skipped,
                        });
                        progressed = true;
                        continue;
                    }

                    let input = live_inputs.join("\n\n");
                    let node = match graph.node(id) {
                        Some(node) => node,
                        None => continue,
                    };
                    publisher.emit(TurnEvent::WorkflowStep {
                        node_id: id.to_string(),
                        phase: StepPhase::Started,
                    });
                    running.insert(id.to_string());
                    progressed = true;

                    let node_id = id.to_string();
                    match &node.kind {
                        NodeKind::Start { .. } => {
                            // Only one start exists and it completed above.
                            running.remove(&node_id);
                        }
                        NodeKind::End => {
                            in_flight.push(
                                async move { (node_id, Utc::now(), Ok(NodeOutcome::Text(input))) }
                                    .boxed(),
                            );
                        }
                        NodeKind::Agent { agent, task } => {
                            let task_text = match task {
                                Some(template) => {
                                    substitute(&placeholder, template, &outputs)
                                }
                                None => input,
                            };
                            let publisher = publisher.clone();
                            let cancel = cancel.clone();
                            let recorder = recorder.clone();
                            in_flight.push(
                                async move {
                                    let started_at = Utc::now();
                                    let span = recorder.begin(
                                        SpanKind::WorkflowStep,
                                        node_id.clone(),
                                        0,
                                    );
                                    let result = self
                                        .exec_agent(agent, task_text, publisher, cancel)
                                        .await;
                                    span.finish(None, result.is_ok()).await;
                                    (node_id, started_at, result)
                                }
                                .boxed(),
                            );
                        }
                        NodeKind::Condition {
                            branches,
                            prompt,
                            model,
                        } => {
                            let publisher = publisher.clone();
                            in_flight.push(
                                async move {
                                    let started_at = Utc::now();
                                    let result = self
                                        .exec_condition(
                                            &node_id, branches, prompt.as_deref(),
                                            model.as_ref(), input, publisher,
                                        )
                                        .await;
                                    (node_id, started_at, result)
                                }
                                .boxed(),
                            );
                        }
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let step = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                step = in_flight.next() => step,
            };
            let Some((node_id, started_at, result)) = step else {
                break;
            };
            running.remove(&node_id);

            match result {
                Ok(NodeOutcome::Text(text)) => {
                    run.step_results.push(WorkflowStepResult {
                        node_id: node_id.clone(),
                        status: StepStatus::Completed,
                        output: Some(text.clone()),
                        error: None,
                        started_at,
                        finished_at: Utc::now(),
                    });
                    publisher.emit(TurnEvent::WorkflowStep {
                        node_id: node_id.clone(),
                        phase: StepPhase::Completed,
                    });
                    outputs.insert(node_id.clone(), text);
                    completed.insert(node_id);
                }
                Ok(NodeOutcome::Branch { selected, input }) => {
                    for &edge_index in graph.outgoing(&node_id) {
                        let edge = graph.edge(edge_index);
                        if let Some(label) = &edge.input_branch {
                            if label != &selected {
                                pruned_edges.insert(edge_index);
                            }
                        }
                    }
                    run.step_results.push(WorkflowStepResult {
                        node_id: node_id.clone(),
                        status: StepStatus::Completed,
                        output: Some(selected),
                        error: None,
                        started_at,
                        finished_at: Utc::now(),
                    });
                    publisher.emit(TurnEvent::WorkflowStep {
                        node_id: node_id.clone(),
                        phase: StepPhase::Completed,
                    });
                    // A condition passes its input through to the taken branch.
                    outputs.insert(node_id.clone(), input);
                    completed.insert(node_id);
                }
                Err(error) => {
                    run.step_results.push(WorkflowStepResult {
                        node_id: node_id.clone(),
                        status: StepStatus::Failed,
                        output: None,
                        error: Some(error.to_string()),
                        started_at,
                        finished_at: Utc::now(),
                    });
                    publisher.emit(TurnEvent::WorkflowStep {
                        node_id: node_id.clone(),
                        phase: StepPhase::Failed,
                    });
                    // Only the failed node's downstream dies; independent
                    // paths keep running toward their end nodes.
                    if failure.is_none() {
                        failure = Some(error.to_string());
                    }
                    failed.insert(node_id);
                }
            }
            self.store.update_run(run.clone()).await?;
        }
        drop(in_flight);

        // Anything not yet resolved is skipped; the run is over.
        for id in graph.node_ids() {
            if !completed.contains(id) && !skipped.contains(id) && !failed.contains(id) {
                skipped.insert(id.to_string());
                run.step_results.push(skipped_step(id));
            }
        }

        let end_outputs: Vec<&str> = graph
            .end_ids()
            .into_iter()
            .filter_map(|id| outputs.get(id).map(String::as_str))
            .collect();

        run.finished_at = Some(Utc::now());
        if cancelled {
            run.status = WorkflowRunStatus::Cancelled;
        } else if end_outputs.is_empty() && failure.is_some() {
            // Failed only when no alternate path reached an end node.
            run.status = WorkflowRunStatus::Failed;
            run.error = failure;
        } else {
            run.status = WorkflowRunStatus::Completed;
            run.output = Some(end_outputs.join("\n\n"));
        }
        self.store.update_run(run.clone()).await?;
        Ok(run)
    }

    /// Run one agent node as a turn against a run-scoped session.
    async fn exec_agent(
        &self,
        agent: &AgentDefinition,
        task: String,
        publisher: Arc<EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<NodeOutcome> {
        let session = Session::for_agent(agent.id);
        let session_id = session.id;
        self.store.insert_session(session).await?;

        let provider = self.provider_for(&agent.model)?;
        let message = self
            .engine
            .run(
                session_id,
                agent,
                provider,
                TurnInput::text(task),
                publisher,
                cancel,
            )
            .await?;
        Ok(NodeOutcome::Text(message.text()))
    }

    /// Select exactly one branch for a condition node. A reply naming no
    /// declared branch, or a failed routing call, falls back to the first
    /// declared branch with a warning event.
    async fn exec_condition(
        &self,
        node_id: &str,
        branches: &[String],
        prompt: Option<&str>,
        model: Option<&LanguageModel>,
        input: String,
        publisher: Arc<EventPublisher>,
    ) -> Result<NodeOutcome> {
        let Some(first) = branches.first() else {
            return Err(crate::error::EngineError::DagValidation(format!(
                "condition node '{node_id}' declares no branches"
            )));
        };

        let picked = match (prompt, model) {
            (Some(prompt), Some(model)) => match self
                .route_branch(prompt, model, branches, &input)
                .await
            {
                Ok(reply) => branches
                    .iter()
                    .find(|b| b.eq_ignore_ascii_case(reply.trim()))
                    .cloned(),
                Err(error) => {
                    tracing::warn!(node = node_id, %error, "branch routing call failed");
                    None
                }
            },
            // Deterministic rule: first branch label found in the input.
            _ => branches
                .iter()
                .find(|b| input.to_lowercase().contains(&b.to_lowercase()))
                .cloned(),
        };

        let selected = match picked {
            Some(branch) => branch,
            None => {
                publisher.emit(TurnEvent::Warning {
                    message: format!(
                        "condition '{node_id}' resolved no branch, falling back to '{first}'"
                    ),
                });
                first.clone()
            }
        };
        Ok(NodeOutcome::Branch { selected, input })
    }

    async fn route_branch(
        &self,
        prompt: &str,
        model: &LanguageModel,
        branches: &[String],
        input: &str,
    ) -> Result<String> {
        let provider = self.provider_for(model)?;
        let request = ProviderRequest {
            messages: vec![
                ModelMessage::system(format!(
                    "{prompt}\nRespond with exactly one of: {}.",
                    branches.join(", ")
                )),
                ModelMessage::user(input.to_string()),
            ],
            settings: GenerationSettings::default(),
            tools: None,
        };
        Ok(self
            .provider_call(provider, request)
            .await?
            .trim()
            .to_string())
    }

    async fn provider_call(
        &self,
        provider: Arc<dyn ModelProvider>,
        request: ProviderRequest,
    ) -> Result<String> {
        let response = provider.generate_text(&request).await?;
        Ok(response.text)
    }

    fn provider_for(&self, model: &LanguageModel) -> Result<Arc<dyn ModelProvider>> {
        self.registry
            .create_provider(&model.provider, &model.model_id, &self.config)
            .map(Arc::from)
    }
}

fn skipped_step(node_id: &str) -> WorkflowStepResult {
    let now = Utc::now();
    WorkflowStepResult {
        node_id: node_id.to_string(),
        status: StepStatus::Skipped,
        output: None,
        error: None,
        started_at: now,
        finished_at: now,
    }
}

/// Replace `{{node_id.output}}` placeholders with upstream outputs.
fn substitute(placeholder: &Regex, template: &str, outputs: &HashMap<String, String>) -> String {
    placeholder
        .replace_all(template, |caps: &regex::Captures<'_>| {
            outputs.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_pull_upstream_outputs() {
        let re = Regex::new(r"\{\{([A-Za-z0-9_\-]+)\.output\}\}").unwrap();
        let mut outputs = HashMap::new();
        outputs.insert("research".to_string(), "three findings".to_string());

        let task = substitute(&re, "Summarize: {{research.output}} / {{missing.output}}", &outputs);
        assert_eq!(task, "Summarize: three findings / ");
    }
}
