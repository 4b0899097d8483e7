//! Council agents: one data-driven record per expert role.
//!
//! Every expert is the same generation call with a different role tag,
//! system prompt and model binding. There is no per-role type: the
//! orchestrator hands an [`Agent`] its context and instruction, and the
//! agent forwards one request to the [`GenerationBackend`].

pub mod backend;
pub mod ollama;
pub mod roster;
pub mod scripted;

use serde::{Deserialize, Serialize};

use crate::errors::{BackendError, ConfigurationError};
use crate::prompts;

pub use backend::{ChunkStream, GenerationBackend, GenerationOptions, GenerationRequest};
pub use ollama::OllamaBackend;
pub use roster::Roster;
pub use scripted::{ScriptedBackend, ScriptedFailure};

/// The closed set of council roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Political, social and economic history of the subcontinent.
    IndianHistorian,
    /// India in comparison with other civilizations.
    CivilizationalHistorian,
    /// Religious traditions, doctrine versus practice.
    ReligionExpert,
    /// Social structure, kinship, lived practice.
    AnthropologyExpert,
    /// Policy analyst; drafts the consensus.
    PolicymakerExpert,
}

impl AgentRole {
    /// All roles in canonical council order.
    pub const ALL: [AgentRole; 5] = [
        Self::IndianHistorian,
        Self::CivilizationalHistorian,
        Self::ReligionExpert,
        Self::AnthropologyExpert,
        Self::PolicymakerExpert,
    ];

    /// Stable role id.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IndianHistorian => "indian_historian",
            Self::CivilizationalHistorian => "civilizational_historian",
            Self::ReligionExpert => "religion_expert",
            Self::AnthropologyExpert => "anthropology_expert",
            Self::PolicymakerExpert => "policymaker_expert",
        }
    }

    /// Human-readable label.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::IndianHistorian => "Indian Historian",
            Self::CivilizationalHistorian => "Civilizational Historian",
            Self::ReligionExpert => "Religion Expert",
            Self::AnthropologyExpert => "Anthropology Expert",
            Self::PolicymakerExpert => "Policymaker",
        }
    }

    /// Whether this is the designated consensus role.
    pub fn is_consensus(self) -> bool {
        self == Self::PolicymakerExpert
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| ConfigurationError::UnknownRole {
                name: wanted.to_string(),
                known: Self::ALL
                    .iter()
                    .map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// A council member: role tag, display name, model binding and prompt.
///
/// Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub role: AgentRole,
    pub display_name: String,
    /// Provider model identifier (e.g. `gpt-oss:latest`).
    pub model: String,
    pub system_prompt: String,
    /// Per-call sampling and token limits.
    pub options: GenerationOptions,
}

impl Agent {
    /// Agent with the role's default name and system prompt.
    pub fn new(role: AgentRole, model: impl Into<String>) -> Self {
        Self {
            role,
            display_name: role.display_name().to_string(),
            model: model.into(),
            system_prompt: prompts::role_system_prompt(role),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether this agent drafts the consensus.
    pub fn is_consensus(&self) -> bool {
        self.role.is_consensus()
    }

    /// Start one generation call.
    ///
    /// `instruction` is the stage-specific task text and `context` the
    /// rendered prior transcript (already bounded by the caller). The
    /// returned stream is not authoritative until it completes.
    pub async fn generate(
        &self,
        backend: &dyn GenerationBackend,
        context: &str,
        instruction: &str,
    ) -> Result<ChunkStream, BackendError> {
        let user_content = if context.is_empty() {
            instruction.to_string()
        } else {
            format!("{instruction}\n\n{context}")
        };

        backend
            .generate(GenerationRequest {
                model: self.model.clone(),
                system_prompt: self.system_prompt.clone(),
                user_content,
                options: self.options.clone(),
            })
            .await
    }
}
