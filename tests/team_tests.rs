mod support;

use std::sync::Arc;

use pretty_assertions::assert_eq;

use support::{drain, position, single_model_registry, Script};
use tycho::agent::{AgentDefinition, TeamDefinition, TeamMode};
use tycho::config::EngineConfig;
use tycho::error::EngineError;
use tycho::events::{AgentStepPhase, TurnEvent};
use tycho::runtime::Runtime;
use tycho::store::{InMemoryStore, MessageStore};
use tycho::turn::TurnInput;
use tycho::types::Role;

#[tokio::test]
async fn route_mode_runs_only_the_selected_member() {
    let script = Script::new();
    script.push_text("refunds"); // classification reply
    script.push_answer("Refund issued");

    let store = Arc::new(InMemoryStore::new());
    let runtime = Runtime::new(
        EngineConfig::default(),
        single_model_registry(script),
        store.clone(),
    );
    let billing = AgentDefinition::new("billing", "stub:stub-model").with_specialty("invoices");
    let refunds = AgentDefinition::new("refunds", "stub:stub-model").with_specialty("refunds");
    let refunds_id = refunds.id;
    let team = TeamDefinition::new("support", TeamMode::Route, vec![billing, refunds]);
    let session = runtime.create_team_session(&team).await.unwrap();

    let events = runtime
        .start_team_turn(&team, session, TurnInput::text("I want my money back"))
        .await
        .unwrap();
    let events = drain(events).await;

    let routing = position(&events, |e| {
        matches!(e, TurnEvent::AgentStep { phase: AgentStepPhase::Routing, .. })
    });
    let selected = position(&events, |e| {
        matches!(e, TurnEvent::AgentStep { phase: AgentStepPhase::Selected, agent_name, .. }
            if agent_name == "refunds")
    });
    let answer = position(&events, |e| {
        matches!(e, TurnEvent::ContentDelta { text } if text == "Refund issued")
    });
    assert!(routing < selected && selected < answer);

    let member_turns = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::AgentStep { phase: AgentStepPhase::Selected, .. }))
        .count();
    assert_eq!(member_turns, 1, "route mode delegates to exactly one member");

    // The answer is attributed to the routed member and is not intermediate.
    let messages = store.list_messages(session).await.unwrap();
    let assistant = messages
        .iter()
        .find(|m| m.message.role == Role::Assistant)
        .unwrap();
    assert_eq!(assistant.metadata.agent_id, Some(refunds_id));
    assert!(!assistant.metadata.intermediate);
}

#[tokio::test]
async fn collaborate_mode_chains_member_outputs_in_order() {
    let script = Script::new();
    script.push_answer("outline: three points");
    script.push_answer("polished essay");

    let store = Arc::new(InMemoryStore::new());
    let runtime = Runtime::new(
        EngineConfig::default(),
        single_model_registry(script),
        store.clone(),
    );
    let outline = AgentDefinition::new("outline", "stub:stub-model");
    let polish = AgentDefinition::new("polish", "stub:stub-model");
    let team = TeamDefinition::new("writers", TeamMode::Collaborate, vec![outline, polish]);
    let session = runtime.create_team_session(&team).await.unwrap();

    let events = runtime
        .start_team_turn(&team, session, TurnInput::text("write about tides"))
        .await
        .unwrap();
    let events = drain(events).await;

    let final_answer = position(&events, |e| {
        matches!(e, TurnEvent::ContentDelta { text } if text == "polished essay")
    });
    assert!(matches!(events.last(), Some(TurnEvent::Done)));
    assert!(final_answer < events.len() - 1);

    // The second member saw the first member's output in its task.
    let messages = store.list_messages(session).await.unwrap();
    assert!(messages.iter().any(|m| {
        m.message.role == Role::User
            && m.message.text().contains("Output from outline:\noutline: three points")
    }));

    // Intermediate outputs are flagged; the final one is not.
    let intermediates: Vec<bool> = messages
        .iter()
        .filter(|m| m.message.role == Role::Assistant)
        .map(|m| m.metadata.intermediate)
        .collect();
    assert_eq!(intermediates, vec![true, false]);
}

#[tokio::test]
async fn coordinate_mode_synthesizes_delegate_outputs() {
    let script = Script::new();
    script.push_text(r#"["researcher", "writer"]"#); // delegation plan
    script.push_answer("facts found");
    script.push_answer("draft written");
    script.push_text("Final synthesized answer");

    let store = Arc::new(InMemoryStore::new());
    let runtime = Runtime::new(
        EngineConfig::default(),
        single_model_registry(script),
        store.clone(),
    );
    let researcher = AgentDefinition::new("researcher", "stub:stub-model");
    let writer = AgentDefinition::new("writer", "stub:stub-model");
    let team = TeamDefinition::new("newsroom", TeamMode::Coordinate, vec![researcher, writer]);
    let session = runtime.create_team_session(&team).await.unwrap();

    let events = runtime
        .start_team_turn(&team, session, TurnInput::text("cover the eclipse"))
        .await
        .unwrap();
    let events = drain(events).await;

    let first_delegate = position(&events, |e| {
        matches!(e, TurnEvent::AgentStep { phase: AgentStepPhase::Responding, agent_name, .. }
            if agent_name == "researcher")
    });
    let second_delegate = position(&events, |e| {
        matches!(e, TurnEvent::AgentStep { phase: AgentStepPhase::Responding, agent_name, .. }
            if agent_name == "writer")
    });
    let synthesis = position(&events, |e| {
        matches!(e, TurnEvent::AgentStep { phase: AgentStepPhase::Synthesizing, .. })
    });
    let final_answer = position(&events, |e| {
        matches!(e, TurnEvent::ContentDelta { text } if text == "Final synthesized answer")
    });
    assert!(first_delegate < second_delegate);
    assert!(second_delegate < synthesis && synthesis < final_answer);

    // Delegate turns are intermediate; the synthesized answer is the final one.
    let messages = store.list_messages(session).await.unwrap();
    let assistants: Vec<_> = messages
        .iter()
        .filter(|m| m.message.role == Role::Assistant)
        .collect();
    assert_eq!(assistants.len(), 3);
    assert!(assistants[0].metadata.intermediate);
    assert!(assistants[1].metadata.intermediate);
    assert!(!assistants[2].metadata.intermediate);
    assert_eq!(assistants[2].message.text(), "Final synthesized answer");
}

#[tokio::test]
async fn unparseable_delegation_plan_falls_back_to_the_first_member() {
    let script = Script::new();
    script.push_text("I think everyone should help"); // not a JSON array
    script.push_answer("solo effort");
    script.push_text("Synthesized from one output");

    let store = Arc::new(InMemoryStore::new());
    let runtime = Runtime::new(
        EngineConfig::default(),
        single_model_registry(script),
        store,
    );
    let solo = AgentDefinition::new("solo", "stub:stub-model");
    let backup = AgentDefinition::new("backup", "stub:stub-model");
    let team = TeamDefinition::new("pair", TeamMode::Coordinate, vec![solo, backup]);
    let session = runtime.create_team_session(&team).await.unwrap();

    let events = runtime
        .start_team_turn(&team, session, TurnInput::text("go"))
        .await
        .unwrap();
    let events = drain(events).await;

    let delegates: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::AgentStep {
                phase: AgentStepPhase::Responding,
                agent_name,
                ..
            } => Some(agent_name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(delegates, vec!["solo"]);
}

#[tokio::test]
async fn empty_team_is_rejected_up_front() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = Runtime::new(
        EngineConfig::default(),
        single_model_registry(Script::new()),
        store,
    );
    let team = TeamDefinition::new("ghost", TeamMode::Route, Vec::new());
    let session = runtime.create_team_session(&team).await.unwrap();

    let err = runtime
        .start_team_turn(&team, session, TurnInput::text("anyone?"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}
