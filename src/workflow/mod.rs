//! Workflow definitions and the DAG scheduler.
//!
//! A workflow is a user-authored directed graph of start/agent/condition/end
//! nodes. The graph is validated once at run start; execution then proceeds
//! by readiness, with independent nodes running concurrently and condition
//! nodes pruning the branches they did not select.

pub mod executor;
pub mod graph;

pub use executor::WorkflowExecutor;
pub use graph::WorkflowGraph;

use uuid::Uuid;

use crate::agent::AgentDefinition;
use crate::models::LanguageModel;

/// A user-authored workflow topology.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(mut self, id: impl Into<String>, kind: NodeKind) -> Self {
        self.nodes.push(WorkflowNode {
            id: id.into(),
            kind,
        });
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(WorkflowEdge {
            from: from.into(),
            to: to.into(),
            input_branch: None,
        });
        self
    }

    /// An edge leaving a condition node, taken only when the condition
    /// selects the given branch label.
    pub fn branch_edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        self.edges.push(WorkflowEdge {
            from: from.into(),
            to: to.into(),
            input_branch: Some(branch.into()),
        });
        self
    }
}

/// One node in a workflow graph.
#[derive(Debug, Clone)]
pub struct WorkflowNode {
    pub id: String,
    pub kind: NodeKind,
}

/// Node behavior.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Supplies the run's seed input: the fixed text if configured, else the
    /// caller-supplied input.
    Start { seed: Option<String> },
    /// Runs the agent's turn engine with a task built from upstream outputs.
    /// `{{node_id.output}}` placeholders in `task` are substituted; without a
    /// task template the upstream outputs are concatenated.
    Agent {
        agent: AgentDefinition,
        task: Option<String>,
    },
    /// Selects exactly one declared branch label for its input, via a model
    /// call when a prompt is configured, else by substring match.
    Condition {
        branches: Vec<String>,
        prompt: Option<String>,
        model: Option<LanguageModel>,
    },
    /// Collects upstream outputs into the run's overall output.
    End,
}

/// A directed edge. `input_branch` labels edges leaving a condition node.
#[derive(Debug, Clone)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
    pub input_branch: Option<String>,
}
