//! DAG validation.
//!
//! The graph is checked once at run start: duplicate or dangling ids,
//! cycles (Kahn topological sort), exactly one start node, and no node
//! without a resolvable upstream. Execution never re-derives ordering; it
//! only consumes the adjacency built here.

use std::collections::{HashMap, VecDeque};

use crate::error::{EngineError, Result};

use super::{NodeKind, WorkflowDefinition, WorkflowNode};

/// Validated adjacency over a workflow definition.
pub struct WorkflowGraph<'a> {
    nodes: HashMap<&'a str, &'a WorkflowNode>,
    /// Incoming edge indexes per node, in declaration order.
    incoming: HashMap<&'a str, Vec<usize>>,
    /// Outgoing edge indexes per node, in declaration order.
    outgoing: HashMap<&'a str, Vec<usize>>,
    start_id: &'a str,
    definition: &'a WorkflowDefinition,
}

impl<'a> WorkflowGraph<'a> {
    /// Validate the definition and build the adjacency.
    pub fn validate(definition: &'a WorkflowDefinition) -> Result<Self> {
        let mut nodes: HashMap<&str, &WorkflowNode> = HashMap::new();
        for node in &definition.nodes {
            if nodes.insert(node.id.as_str(), node).is_some() {
                return Err(EngineError::DagValidation(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        let mut incoming: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, edge) in definition.edges.iter().enumerate() {
            for endpoint in [edge.from.as_str(), edge.to.as_str()] {
                if !nodes.contains_key(endpoint) {
                    return Err(EngineError::DagValidation(format!(
                        "edge references unknown node '{endpoint}'"
                    )));
                }
            }
            if edge.input_branch.is_some() {
                match &nodes[edge.from.as_str()].kind {
                    NodeKind::Condition { branches, .. } => {
                        let label = edge.input_branch.as_deref().unwrap_or_default();
                        if !branches.iter().any(|b| b == label) {
                            return Err(EngineError::DagValidation(format!(
                                "edge from '{}' uses undeclared branch '{label}'",
                                edge.from
                            )));
                        }
                    }
                    _ => {
                        return Err(EngineError::DagValidation(format!(
                            "branch label on edge from non-condition node '{}'",
                            edge.from
                        )));
                    }
                }
            }
            outgoing.entry(edge.from.as_str()).or_default().push(index);
            incoming.entry(edge.to.as_str()).or_default().push(index);
        }

        let mut starts = definition
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Start { .. }));
        let Some(start) = starts.next() else {
            return Err(EngineError::DagValidation(
                "workflow has no start node".to_string(),
            ));
        };
        if starts.next().is_some() {
            return Err(EngineError::DagValidation(
                "workflow has more than one start node".to_string(),
            ));
        }
        if incoming.contains_key(start.id.as_str()) {
            return Err(EngineError::DagValidation(format!(
                "start node '{}' has upstream edges",
                start.id
            )));
        }
        for node in &definition.nodes {
            if node.id != start.id && !incoming.contains_key(node.id.as_str()) {
                return Err(EngineError::UnreachableNode(node.id.clone()));
            }
        }

        // Kahn's algorithm; anything left over sits on a cycle.
        let mut indegree: HashMap<&str, usize> = definition
            .nodes
            .iter()
            .map(|n| {
                (
                    n.id.as_str(),
                    incoming.get(n.id.as_str()).map_or(0, Vec::len),
                )
            })
            .collect();
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for &edge_index in outgoing.get(id).into_iter().flatten() {
                let to = definition.edges[edge_index].to.as_str();
                let degree = indegree.entry(to).or_insert(0);
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(to);
                }
            }
        }
        if visited != definition.nodes.len() {
            let mut cyclic: Vec<&str> = indegree
                .iter()
                .filter(|(_, deg)| **deg > 0)
                .map(|(id, _)| *id)
                .collect();
            cyclic.sort_unstable();
            return Err(EngineError::DagCycle(cyclic.join(", ")));
        }

        let start_id = start.id.as_str();
        Ok(Self {
            nodes,
            incoming,
            outgoing,
            start_id,
            definition,
        })
    }

    pub fn start_id(&self) -> &'a str {
        self.start_id
    }

    pub fn node(&self, id: &str) -> Option<&'a WorkflowNode> {
        self.nodes.get(id).copied()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.definition.nodes.iter().map(|n| n.id.as_str())
    }

    /// Incoming edges of a node, in declaration order.
    pub fn incoming(&self, id: &str) -> &[usize] {
        self.incoming.get(id).map_or(&[], Vec::as_slice)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing(&self, id: &str) -> &[usize] {
        self.outgoing.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn edge(&self, index: usize) -> &'a super::WorkflowEdge {
        &self.definition.edges[index]
    }

    /// End node ids in declaration order.
    pub fn end_ids(&self) -> Vec<&'a str> {
        self.definition
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::End))
            .map(|n| n.id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentDefinition;

    fn agent_node() -> NodeKind {
        NodeKind::Agent {
            agent: AgentDefinition::new("worker", "stub:stub-model"),
            task: None,
        }
    }

    #[test]
    fn straight_line_validates() {
        let wf = WorkflowDefinition::new("line")
            .node("start", NodeKind::Start { seed: None })
            .node("a", agent_node())
            .node("end", NodeKind::End)
            .edge("start", "a")
            .edge("a", "end");
        let graph = WorkflowGraph::validate(&wf).unwrap();
        assert_eq!(graph.start_id(), "start");
        assert_eq!(graph.end_ids(), vec!["end"]);
    }

    #[test]
    fn cycle_is_rejected_before_any_execution() {
        let wf = WorkflowDefinition::new("loop")
            .node("start", NodeKind::Start { seed: None })
            .node("a", agent_node())
            .node("b", agent_node())
            .edge("start", "a")
            .edge("a", "b")
            .edge("b", "a");
        match WorkflowGraph::validate(&wf) {
            Err(EngineError::DagCycle(nodes)) => {
                assert!(nodes.contains('a') && nodes.contains('b'));
            }
            other => panic!("expected cycle rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn node_without_upstream_is_unreachable() {
        let wf = WorkflowDefinition::new("orphan")
            .node("start", NodeKind::Start { seed: None })
            .node("a", agent_node())
            .node("island", agent_node())
            .edge("start", "a");
        match WorkflowGraph::validate(&wf) {
            Err(EngineError::UnreachableNode(id)) => assert_eq!(id, "island"),
            other => panic!("expected unreachable node, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn second_start_node_is_rejected() {
        let wf = WorkflowDefinition::new("two-starts")
            .node("s1", NodeKind::Start { seed: None })
            .node("s2", NodeKind::Start { seed: None })
            .node("a", agent_node())
            .edge("s1", "a")
            .edge("s2", "a");
        assert!(matches!(
            WorkflowGraph::validate(&wf),
            Err(EngineError::DagValidation(_))
        ));
    }

    #[test]
    fn undeclared_branch_label_is_rejected() {
        let wf = WorkflowDefinition::new("bad-branch")
            .node("start", NodeKind::Start { seed: None })
            .node(
                "cond",
                NodeKind::Condition {
                    branches: vec!["yes".into(), "no".into()],
                    prompt: None,
                    model: None,
                },
            )
            .node("a", agent_node())
            .edge("start", "cond")
            .branch_edge("cond", "a", "maybe");
        assert!(matches!(
            WorkflowGraph::validate(&wf),
            Err(EngineError::DagValidation(_))
        ));
    }
}
