//! Tycho, an agent execution engine.
//!
//! Drives a single conversational turn or workflow run from start to a
//! terminal state: the tool-calling loop, human-in-the-loop approval
//! suspension/resume, multi-agent delegation, and a DAG workflow scheduler,
//! all while streaming ordered events to an observer.
//!
//! Providers, knowledge bases, and persistence are consumed through narrow
//! traits; see [`provider::ModelProvider`], [`knowledge::KnowledgeBase`], and
//! the repository traits in [`store`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tycho::prelude::*;
//!
//! # async fn example(registry: Arc<tycho::provider::ProviderRegistry>) -> tycho::error::Result<()> {
//! let store = Arc::new(tycho::store::InMemoryStore::new());
//! let runtime = Runtime::new(EngineConfig::from_env(), registry, store);
//! let agent = AgentDefinition::new("helper", "stub:stub-model");
//! let session = runtime.create_session(&agent).await?;
//! let mut events = runtime.start_turn(&agent, session, TurnInput::text("hello")).await?;
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod approval;
pub mod config;
pub mod error;
pub mod events;
pub mod knowledge;
pub mod models;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub mod schedule;
pub mod store;
pub mod team;
pub mod tools;
pub mod trace;
pub mod turn;
pub mod types;
pub mod workflow;
