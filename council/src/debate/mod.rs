//! Debate orchestration: opening statements, rebuttal rounds, consensus.
//!
//! # Debate Flow
//!
//! ```text
//! Created → Opening → [K > 0?]
//!              │         ├─ Yes → Rebuttal(0) → … → Rebuttal(K-1) ─┐
//!              │         └─ No ───────────────────────────────────┤
//!              │                                                  ▼
//!              │                                             Consensus → Archived
//!              │
//!              └─ unrecovered failure or cancel at any point → Failed
//! ```

pub mod events;
pub mod orchestrator;
pub mod state;
pub mod topic;

pub use events::{DebateEvent, EventBus, EventFilter, SharedEventBus};
pub use orchestrator::{CancelHandle, DebateOrchestrator, StepOutcome, StepReport};
pub use state::{
    ConsensusResult, DebateSession, DebateState, DebateTransition, Message, Round, RoundRef,
    SessionFailure, SessionSettings, Stage, TransitionError, MAX_REBUTTAL_ROUNDS,
};
pub use topic::DebateTopic;
