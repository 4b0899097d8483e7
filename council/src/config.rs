//! Council configuration.
//!
//! Layered, lowest precedence first: built-in defaults, an optional TOML
//! file, environment variables. The CLI applies its flags on top. The
//! result is passed explicitly into session creation; there is no global
//! configuration state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::{AgentRole, GenerationOptions};
use crate::budget::TruncationPolicy;
use crate::debate::state::{SessionSettings, MAX_REBUTTAL_ROUNDS};
use crate::errors::ConfigurationError;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL_ALIAS: &str = "gpt_oss_latest";

/// A model alias entry: provider model name plus sampling options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider model identifier.
    pub name: String,
    pub max_completion_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl ModelConfig {
    /// Backend options for calls to this model.
    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_completion_tokens,
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            stop_sequences: Vec::new(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-oss:latest".into(),
            max_completion_tokens: 1024,
            temperature: 1.0,
            top_p: 1.0,
        }
    }
}

/// Token budgets per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageBudgets {
    pub rebuttal_context_tokens: u32,
    pub consensus_context_tokens: u32,
    pub message_overhead_tokens: u32,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            rebuttal_context_tokens: 6000,
            consensus_context_tokens: 8000,
            message_overhead_tokens: 4,
        }
    }
}

/// Top-level council configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Generation backend endpoint.
    pub ollama_host: String,
    pub default_model_alias: String,
    /// Model alias registry.
    pub models: BTreeMap<String, ModelConfig>,
    /// Role id → model alias. Roles not listed use the default alias.
    pub role_models: BTreeMap<String, String>,
    /// Council membership, in speaking order.
    pub council_roles: Vec<AgentRole>,
    /// Rebuttal rounds K.
    pub max_rebuttal_rounds: u32,
    pub budgets: StageBudgets,
    /// Wall-clock limit per generation call.
    pub call_timeout_secs: u64,
    /// Attempts per call, first try included.
    pub max_attempts: u32,
    pub truncation: TruncationPolicy,
    /// Where saved debates live.
    pub debates_dir: PathBuf,
    pub debug: bool,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(DEFAULT_MODEL_ALIAS.to_string(), ModelConfig::default());
        let role_models = AgentRole::ALL
            .iter()
            .map(|r| (r.as_str().to_string(), DEFAULT_MODEL_ALIAS.to_string()))
            .collect();

        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.into(),
            default_model_alias: DEFAULT_MODEL_ALIAS.into(),
            models,
            role_models,
            council_roles: AgentRole::ALL.to_vec(),
            max_rebuttal_rounds: 1,
            budgets: StageBudgets::default(),
            call_timeout_secs: 300,
            max_attempts: 2,
            truncation: TruncationPolicy::KeepLatest,
            debates_dir: PathBuf::from("debates"),
            debug: false,
        }
    }
}

impl CouncilConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            ConfigurationError::Unreadable { reason, .. } => ConfigurationError::Unreadable {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Parse TOML; missing fields take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(raw).map_err(|e| ConfigurationError::Unreadable {
            path: "<inline>".into(),
            reason: e.to_string(),
        })
    }

    /// Overlay variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigurationError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("OLLAMA_HOST") {
            self.ollama_host = host.trim().to_string();
        }
        if let Some(alias) = get("COUNCIL_DEFAULT_MODEL_ALIAS") {
            self.default_model_alias = alias.trim().to_string();
        }
        if let Some(roles) = get("COUNCIL_ROLES") {
            self.council_roles = parse_roles(&roles)?;
        }
        if let Some(rounds) = get("COUNCIL_REBUTTAL_ROUNDS") {
            self.max_rebuttal_rounds = parse_number("COUNCIL_REBUTTAL_ROUNDS", &rounds)?;
        }
        if let Some(secs) = get("COUNCIL_CALL_TIMEOUT_SECS") {
            self.call_timeout_secs = parse_number("COUNCIL_CALL_TIMEOUT_SECS", &secs)?;
        }
        if let Some(dir) = get("COUNCIL_DEBATES_DIR") {
            self.debates_dir = PathBuf::from(dir.trim());
        }
        if let Some(flag) = get("COUNCIL_DEBUG") {
            self.debug = parse_flag(&flag);
        }
        Ok(())
    }

    /// Look up a model alias.
    pub fn model(&self, alias: &str) -> Result<&ModelConfig, ConfigurationError> {
        self.models
            .get(alias)
            .ok_or_else(|| ConfigurationError::UnknownModelAlias {
                alias: alias.to_string(),
                known: self.models.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }

    /// Reject configurations no session can run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.ollama_host.trim().is_empty() {
            return Err(ConfigurationError::InvalidSetting {
                field: "ollama_host",
                reason: "must not be empty".into(),
            });
        }
        self.model(&self.default_model_alias)?;
        if self.council_roles.is_empty() {
            return Err(ConfigurationError::EmptyRoster);
        }
        for role in self.role_models.keys() {
            role.parse::<AgentRole>()?;
        }
        if self.budgets.message_overhead_tokens >= self.budgets.rebuttal_context_tokens {
            return Err(ConfigurationError::InvalidBudget(
                "message_overhead_tokens must be below rebuttal_context_tokens".into(),
            ));
        }
        self.session_settings().validate()
    }

    /// Run-time subset frozen into each session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_rebuttal_rounds: self.max_rebuttal_rounds,
            rebuttal_context_tokens: self.budgets.rebuttal_context_tokens,
            consensus_context_tokens: self.budgets.consensus_context_tokens,
            message_overhead_tokens: self.budgets.message_overhead_tokens,
            call_timeout_secs: self.call_timeout_secs,
            max_attempts: self.max_attempts,
            truncation: self.truncation,
        }
    }

    /// Upper bound on rebuttal rounds.
    pub fn max_rounds_allowed() -> u32 {
        MAX_REBUTTAL_ROUNDS
    }
}

/// Comma-separated role ids.
pub fn parse_roles(raw: &str) -> Result<Vec<AgentRole>, ConfigurationError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<AgentRole>)
        .collect()
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigurationError::InvalidSetting {
            field,
            reason: format!("'{}': {e}", raw.trim()),
        })
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
