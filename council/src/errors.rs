//! Error taxonomy for the debate engine.
//!
//! Explicit typed errors for every failure class: configuration problems
//! rejected before any stage starts, per-call generation failures, illegal
//! use of the orchestrator API, and non-fatal budget warnings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentRole;
use crate::debate::state::{Stage, TransitionError};

/// Fatal configuration problems, raised before any stage starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("debate topic is empty")]
    EmptyTopic,

    #[error("agent roster is empty")]
    EmptyRoster,

    #[error("roster has no expert agents (only the consensus role)")]
    NoDebaters,

    #[error("roster has no consensus agent")]
    MissingConsensusAgent,

    #[error("roster has more than one consensus agent")]
    MultipleConsensusAgents,

    #[error("role {0} appears more than once in the roster")]
    DuplicateRole(AgentRole),

    #[error("unknown council role '{name}' (known roles: {known})")]
    UnknownRole { name: String, known: String },

    #[error("invalid rebuttal round count {requested} (allowed 0..={max})")]
    InvalidRoundCount { requested: u32, max: u32 },

    #[error("invalid token budget: {0}")]
    InvalidBudget(String),

    #[error("unknown model alias '{alias}' (known aliases: {known})")]
    UnknownModelAlias { alias: String, known: String },

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Errors reported by a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("malformed chunk: {0}")]
    Malformed(String),
}

/// Why a single agent call failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureCause {
    /// Backend error or stream error.
    #[error("backend error: {0}")]
    Backend(String),
    /// The call exceeded its wall-clock budget.
    #[error("timed out after {0}s")]
    Timeout(u64),
    /// The stream completed without producing any text.
    #[error("empty stream")]
    EmptyStream,
    /// The session was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl FailureCause {
    /// Whether retrying the same call can help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// A failed agent call, scoped to one role in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("generation failed for {role} in {stage} round {round}: {cause}")]
pub struct GenerationFailure {
    pub role: AgentRole,
    pub stage: Stage,
    pub round: u32,
    pub cause: FailureCause,
}

/// Misuse of the orchestrator API. Generation failures are not reported
/// here; they move the session to `Failed` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebateError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("debate already complete")]
    AlreadyComplete,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// What kind of content reduction triggered a budget warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A single message was larger than a whole context window.
    MessageTruncated,
    /// Consensus compression had to cut retained statements.
    TranscriptTruncated,
    /// Statement headers alone exceed the consensus budget.
    HeadersOverBudget,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageTruncated => write!(f, "message_truncated"),
            Self::TranscriptTruncated => write!(f, "transcript_truncated"),
            Self::HeadersOverBudget => write!(f, "headers_over_budget"),
        }
    }
}

/// Non-fatal record of aggressive truncation. Logged and stored in the
/// session; never stops the debate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetViolationWarning {
    pub kind: ViolationKind,
    /// Agent whose prompt was being built.
    pub role: AgentRole,
    pub stage: Stage,
    pub round: u32,
    /// Token budget in force.
    pub budget: u32,
    /// Tokens before reduction.
    pub original_tokens: u32,
    /// Tokens after reduction.
    pub kept_tokens: u32,
}

impl std::fmt::Display for BudgetViolationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} for {} in {} round {}: {} → {} tokens (budget {})",
            self.kind,
            self.role,
            self.stage,
            self.round,
            self.original_tokens,
            self.kept_tokens,
            self.budget
        )
    }
}
