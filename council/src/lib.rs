//! Expert council debate engine.
//!
//! A fixed roster of expert agents debates a topic in stages:
//!
//! - **Opening**: every expert states a position, seeing no prior statements.
//! - **Rebuttal** (K rounds): every expert responds to a token-bounded
//!   window over every statement made so far.
//! - **Consensus**: the consensus agent drafts a result from a compressed
//!   transcript of the whole debate.
//!
//! Generation goes through the [`agent::GenerationBackend`] seam
//! ([`agent::OllamaBackend`] for a real model server,
//! [`agent::ScriptedBackend`] for tests and dry runs). Finished sessions are
//! stored as [`persistence::SessionRecord`]s.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use council::{CouncilConfig, DebateOrchestrator, DebateTopic, OllamaBackend, Roster};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CouncilConfig::from_env()?;
//! let backend = Arc::new(OllamaBackend::new(&config.ollama_host)?);
//! let orchestrator = DebateOrchestrator::new(backend);
//! let roster = Roster::from_config(&config)?;
//! let topic = DebateTopic::new("Origins of the Indus Valley script");
//! let mut session = orchestrator.create_session(topic, roster, &config)?;
//! orchestrator.run(&mut session).await?;
//! println!("{}", session.status_line());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod budget;
pub mod compressor;
pub mod config;
pub mod context_window;
pub mod debate;
pub mod errors;
pub mod persistence;
pub mod prompts;
pub mod text;

pub use agent::{
    Agent, AgentRole, GenerationBackend, GenerationOptions, OllamaBackend, Roster,
    ScriptedBackend, ScriptedFailure,
};
pub use budget::{TokenBudgeter, TruncationPolicy};
pub use config::CouncilConfig;
pub use debate::{
    CancelHandle, DebateEvent, DebateOrchestrator, DebateSession, DebateState, DebateTopic,
    Stage, StepOutcome, StepReport,
};
pub use errors::{
    BackendError, BudgetViolationWarning, ConfigurationError, DebateError, FailureCause,
    GenerationFailure,
};
pub use persistence::{
    InMemoryRepository, JsonFileRepository, PersistenceError, SessionRecord, SessionRepository,
};
