//! Agent and team definitions: the configuration the engine executes.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::knowledge::KnowledgeBase;
use crate::models::LanguageModel;
use crate::tools::ToolRegistry;
use crate::types::GenerationSettings;

/// A configured agent: a model bound to tools, context sources, and policies.
#[derive(Clone)]
pub struct AgentDefinition {
    pub id: Uuid,
    pub name: String,
    pub model: LanguageModel,
    pub system_prompt: Option<String>,
    pub settings: GenerationSettings,
    pub tools: ToolRegistry,
    /// Per-tool approval overrides: flagged here means gated even if the tool
    /// itself does not require approval.
    pub approval_required_tools: HashSet<String>,
    pub knowledge_bases: Vec<Arc<dyn KnowledgeBase>>,
    /// Short description of what this agent is for; used by team routing.
    pub specialty: Option<String>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, model: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            model: model.parse().unwrap_or_else(|_| LanguageModel::new("custom", model)),
            system_prompt: None,
            settings: GenerationSettings::default(),
            tools: ToolRegistry::new(),
            approval_required_tools: HashSet::new(),
            knowledge_bases: Vec::new(),
            specialty: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    /// Flag a tool name as approval-gated for this agent.
    pub fn require_approval_for(mut self, tool_name: impl Into<String>) -> Self {
        self.approval_required_tools.insert(tool_name.into());
        self
    }

    /// Whether a call to `tool_name` must pass the approval gate: either the
    /// tool's own flag or this agent's override list.
    pub fn needs_approval(&self, tool_name: &str) -> bool {
        self.approval_required_tools.contains(tool_name)
            || self
                .tools
                .get(tool_name)
                .map(|tool| tool.requires_approval())
                .unwrap_or(false)
    }
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Delegation strategy for a team.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TeamMode {
    /// A lead turn plans delegation, then synthesizes the collected outputs.
    Coordinate,
    /// One classification call picks exactly one member.
    Route,
    /// Members run in order, each seeing the prior member's output.
    Collaborate,
}

/// A team of agents with a delegation strategy.
#[derive(Clone)]
pub struct TeamDefinition {
    pub id: Uuid,
    pub name: String,
    pub mode: TeamMode,
    /// Member order matters: it is the collaborate chain order and the
    /// routing tie-break fallback.
    pub agents: Vec<AgentDefinition>,
    /// Model used for the lead/classification calls; defaults to the first
    /// member's model.
    pub router_model: Option<LanguageModel>,
    pub coordinator_prompt: Option<String>,
}

impl TeamDefinition {
    pub fn new(name: impl Into<String>, mode: TeamMode, agents: Vec<AgentDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            mode,
            agents,
            router_model: None,
            coordinator_prompt: None,
        }
    }

    /// Fallback member for ambiguous routing decisions.
    pub fn first_agent(&self) -> Option<&AgentDefinition> {
        self.agents.first()
    }

    /// Find a member by id or (case-insensitive) name.
    pub fn find_agent(&self, reference: &str) -> Option<&AgentDefinition> {
        let trimmed = reference.trim();
        self.agents.iter().find(|agent| {
            agent.id.to_string() == trimmed || agent.name.eq_ignore_ascii_case(trimmed)
        })
    }
}

impl std::fmt::Debug for TeamDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("agents", &self.agents.iter().map(|a| &a.name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FunctionTool;
    use serde_json::json;

    #[test]
    fn approval_override_flags_unflagged_tool() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(FunctionTool::new(
            "delete_file",
            "Delete a file",
            json!({}),
            |_| async { Ok(json!(null)) },
        )));

        let agent = AgentDefinition::new("ops", "stub:stub-model")
            .with_tools(tools)
            .require_approval_for("delete_file");

        assert!(agent.needs_approval("delete_file"));
        assert!(!agent.needs_approval("other_tool"));
    }

    #[test]
    fn tool_level_flag_is_honored_without_override() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(
            FunctionTool::new("rm", "Remove", json!({}), |_| async { Ok(json!(null)) })
                .with_approval_required(),
        ));

        let agent = AgentDefinition::new("ops", "stub:stub-model").with_tools(tools);
        assert!(agent.needs_approval("rm"));
    }

    #[test]
    fn find_agent_matches_name_case_insensitively() {
        let team = TeamDefinition::new(
            "support",
            TeamMode::Route,
            vec![
                AgentDefinition::new("billing", "stub:stub-model"),
                AgentDefinition::new("refunds", "stub:stub-model"),
            ],
        );

        assert_eq!(team.find_agent("Refunds").unwrap().name, "refunds");
        assert!(team.find_agent("unknown").is_none());
        assert_eq!(team.first_agent().unwrap().name, "billing");
    }
}
