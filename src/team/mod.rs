//! Team router: coordinate / route / collaborate delegation over turn engines.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentDefinition, TeamDefinition, TeamMode};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{AgentStepPhase, EventPublisher, TurnEvent};
use crate::models::LanguageModel;
use crate::provider::{ModelProvider, ProviderRegistry, ProviderRequest};
use crate::store::{EngineStore, MessageMetadata, StoredMessage};
use crate::turn::{TurnEngine, TurnInput};
use crate::types::{GenerationSettings, ModelMessage};

const ROUTER_PROMPT: &str = "You route a user request to the best specialist. \
Respond with exactly one specialist name from the list, nothing else.";

const COORDINATOR_PROMPT: &str = "You lead a team of specialists. Decide which members \
should handle the request and in what order. Respond with a JSON array of member names, \
nothing else.";

const SYNTHESIS_PROMPT: &str = "Combine the team members' outputs below into one final \
answer for the user. Do not mention the team or the members.";

/// Runs team turns by delegating to member turn engines.
pub struct TeamRouter {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn EngineStore>,
    engine: Arc<TurnEngine>,
}

impl TeamRouter {
    pub fn new(
        config: EngineConfig,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn EngineStore>,
        engine: Arc<TurnEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            engine,
        }
    }

    /// Run one team turn to a final message, per the team's delegation mode.
    pub async fn run(
        &self,
        session_id: Uuid,
        team: &TeamDefinition,
        input: TurnInput,
        publisher: Arc<EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<ModelMessage> {
        match team.mode {
            TeamMode::Route => self.run_route(session_id, team, input, publisher, cancel).await,
            TeamMode::Collaborate => {
                self.run_collaborate(session_id, team, input, publisher, cancel)
                    .await
            }
            TeamMode::Coordinate => {
                self.run_coordinate(session_id, team, input, publisher, cancel)
                    .await
            }
        }
    }

    /// One classification call picks exactly one member; that member's output
    /// is the final answer unmodified.
    async fn run_route(
        &self,
        session_id: Uuid,
        team: &TeamDefinition,
        input: TurnInput,
        publisher: Arc<EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<ModelMessage> {
        publisher.emit(TurnEvent::AgentStep {
            phase: AgentStepPhase::Routing,
            agent_id: None,
            agent_name: team.name.clone(),
        });
        let agent = self.pick_member(team, &input.text).await.ok_or_else(|| {
            crate::error::EngineError::InvalidArgument("team has no members".to_string())
        })?;
        publisher.emit(TurnEvent::AgentStep {
            phase: AgentStepPhase::Selected,
            agent_id: Some(agent.id),
            agent_name: agent.name.clone(),
        });

        let message = self
            .member_turn(session_id, agent, input, &publisher, &cancel, false)
            .await?;
        publisher.emit(TurnEvent::AgentStep {
            phase: AgentStepPhase::Completed,
            agent_id: Some(agent.id),
            agent_name: agent.name.clone(),
        });
        Ok(message)
    }

    /// Members run in declared order, each seeing the prior member's output
    /// appended to its task; the last member's output is the final answer.
    async fn run_collaborate(
        &self,
        session_id: Uuid,
        team: &TeamDefinition,
        input: TurnInput,
        publisher: Arc<EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<ModelMessage> {
        let mut prior: Option<(String, String)> = None;
        let mut last_message = ModelMessage::assistant("");

        for (index, agent) in team.agents.iter().enumerate() {
            let is_last = index + 1 == team.agents.len();
            publisher.emit(TurnEvent::AgentStep {
                phase: AgentStepPhase::Selected,
                agent_id: Some(agent.id),
                agent_name: agent.name.clone(),
            });

            let task = match &prior {
                Some((name, output)) => TurnInput::text(format!(
                    "{}\n\nOutput from {name}:\n{output}",
                    input.text
                )),
                None => TurnInput::text(input.text.clone()),
            };
            let message = self
                .member_turn(session_id, agent, task, &publisher, &cancel, !is_last)
                .await?;
            publisher.emit(TurnEvent::AgentStep {
                phase: AgentStepPhase::Completed,
                agent_id: Some(agent.id),
                agent_name: agent.name.clone(),
            });

            prior = Some((agent.name.clone(), message.text()));
            last_message = message;
            if cancel.is_cancelled() {
                break;
            }
        }
        Ok(last_message)
    }

    /// A lead call plans the delegation order, each delegate runs a turn, and
    /// one synthesis call folds the collected outputs into the final answer.
    async fn run_coordinate(
        &self,
        session_id: Uuid,
        team: &TeamDefinition,
        input: TurnInput,
        publisher: Arc<EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<ModelMessage> {
        publisher.emit(TurnEvent::AgentStep {
            phase: AgentStepPhase::Routing,
            agent_id: None,
            agent_name: team.name.clone(),
        });
        let delegates = self.plan_delegation(team, &input.text).await;

        let mut outputs = Vec::new();
        for agent in &delegates {
            publisher.emit(TurnEvent::AgentStep {
                phase: AgentStepPhase::Responding,
                agent_id: Some(agent.id),
                agent_name: agent.name.clone(),
            });
            let message = self
                .member_turn(
                    session_id,
                    agent,
                    TurnInput::text(input.text.clone()),
                    &publisher,
                    &cancel,
                    true,
                )
                .await?;
            publisher.emit(TurnEvent::AgentStep {
                phase: AgentStepPhase::Completed,
                agent_id: Some(agent.id),
                agent_name: agent.name.clone(),
            });
            outputs.push((agent.name.clone(), message.text()));
            if cancel.is_cancelled() {
                break;
            }
        }

        publisher.emit(TurnEvent::AgentStep {
            phase: AgentStepPhase::Synthesizing,
            agent_id: None,
            agent_name: team.name.clone(),
        });
        let final_text = self.synthesize(team, &input.text, &outputs).await?;

        let message = ModelMessage::assistant(final_text.clone());
        let mut stored = StoredMessage::new(session_id, message.clone());
        stored.metadata = MessageMetadata {
            model: Some(self.lead_model(team).to_string()),
            ..MessageMetadata::default()
        };
        self.store.append_message(stored).await?;
        publisher.emit(TurnEvent::ContentDelta { text: final_text });
        publisher.emit(TurnEvent::MessageComplete {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Run one member's turn, tagging persisted messages with the member.
    async fn member_turn(
        &self,
        session_id: Uuid,
        agent: &AgentDefinition,
        input: TurnInput,
        publisher: &Arc<EventPublisher>,
        cancel: &CancellationToken,
        intermediate: bool,
    ) -> Result<ModelMessage> {
        let provider = self.provider_for(&agent.model)?;
        self.engine
            .run(
                session_id,
                agent,
                provider,
                input.tagged(agent.id, intermediate),
                publisher.clone(),
                cancel.clone(),
            )
            .await
    }

    /// Classification call for route mode. An ambiguous or unknown reply
    /// falls back to the first member.
    async fn pick_member<'a>(
        &self,
        team: &'a TeamDefinition,
        query: &str,
    ) -> Option<&'a AgentDefinition> {
        let first = team.first_agent()?;
        let roster = roster_block(team);
        let reply = self
            .lead_call(
                team,
                ROUTER_PROMPT,
                &format!("Specialists:\n{roster}\nRequest: {query}"),
            )
            .await;

        match reply {
            Ok(text) => match team.find_agent(&text) {
                Some(agent) => Some(agent),
                None => {
                    tracing::debug!(team = %team.name, reply = %text, "router named no known member, using first");
                    Some(first)
                }
            },
            Err(error) => {
                tracing::warn!(team = %team.name, %error, "routing call failed, using first member");
                Some(first)
            }
        }
    }

    /// Lead planning call for coordinate mode. Falls back to the first member
    /// when the plan is unparseable or names nobody.
    async fn plan_delegation<'a>(
        &self,
        team: &'a TeamDefinition,
        query: &str,
    ) -> Vec<&'a AgentDefinition> {
        let roster = roster_block(team);
        let system = team
            .coordinator_prompt
            .as_deref()
            .unwrap_or(COORDINATOR_PROMPT);
        let reply = self
            .lead_call(team, system, &format!("Members:\n{roster}\nRequest: {query}"))
            .await;

        let mut delegates: Vec<&AgentDefinition> = Vec::new();
        if let Ok(text) = reply {
            if let Ok(names) = serde_json::from_str::<Vec<String>>(strip_fences(&text)) {
                for name in names {
                    if let Some(agent) = team.find_agent(&name) {
                        if !delegates.iter().any(|a| a.id == agent.id) {
                            delegates.push(agent);
                        }
                    }
                }
            }
        }
        if delegates.is_empty() {
            if let Some(first) = team.first_agent() {
                delegates.push(first);
            }
        }
        delegates
    }

    async fn synthesize(
        &self,
        team: &TeamDefinition,
        query: &str,
        outputs: &[(String, String)],
    ) -> Result<String> {
        let collected = outputs
            .iter()
            .map(|(name, output)| format!("## {name}\n{output}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        self.lead_call(
            team,
            SYNTHESIS_PROMPT,
            &format!("Request: {query}\n\n{collected}"),
        )
        .await
    }

    /// One non-streaming call with the team's lead model.
    async fn lead_call(&self, team: &TeamDefinition, system: &str, user: &str) -> Result<String> {
        let provider = self.provider_for(&self.lead_model(team))?;
        let request = ProviderRequest {
            messages: vec![ModelMessage::system(system), ModelMessage::user(user)],
            settings: GenerationSettings::default(),
            tools: None,
        };
        let response = provider.generate_text(&request).await?;
        Ok(response.text.trim().to_string())
    }

    fn lead_model(&self, team: &TeamDefinition) -> LanguageModel {
        team.router_model
            .clone()
            .or_else(|| team.first_agent().map(|a| a.model.clone()))
            .unwrap_or_else(|| LanguageModel::new("stub", "stub-model"))
    }

    fn provider_for(&self, model: &LanguageModel) -> Result<Arc<dyn ModelProvider>> {
        self.registry
            .create_provider(&model.provider, &model.model_id, &self.config)
            .map(Arc::from)
    }
}

fn roster_block(team: &TeamDefinition) -> String {
    team.agents
        .iter()
        .map(|agent| {
            format!(
                "- {}: {}",
                agent.name,
                agent.specialty.as_deref().unwrap_or("generalist")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim a possible markdown code fence around a JSON reply.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
