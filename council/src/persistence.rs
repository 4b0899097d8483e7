//! Debate records and the repositories that store them.
//!
//! A [`SessionRecord`] is the durable, self-describing form of a finished
//! (archived or failed) session. Records round-trip exactly: loading a
//! saved document and serialising it again yields the same JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::agent::AgentRole;
use crate::debate::{
    ConsensusResult, DebateSession, DebateState, DebateTopic, DebateTransition, Message, Round,
    SessionFailure, SessionSettings,
};
use crate::errors::BudgetViolationWarning;

/// Record format version written by this build.
pub const CURRENT_VERSION: u32 = 1;

/// Default number of entries returned by `list`.
pub const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid session id: {0:?}")]
    InvalidId(String),

    #[error("unsupported record version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("inconsistent record {id}: {reason}")]
    Inconsistent { id: String, reason: String },
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One roster member as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub role: AgentRole,
    pub display_name: String,
    pub model: String,
}

/// Persisted debate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub version: u32,
    pub session_id: String,
    pub topic: DebateTopic,
    pub roster: Vec<RosterEntry>,
    pub settings: SessionSettings,
    pub state: DebateState,
    pub messages: Vec<Message>,
    pub rounds: Vec<Round>,
    pub transitions: Vec<DebateTransition>,
    #[serde(default)]
    pub warnings: Vec<BudgetViolationWarning>,
    pub consensus: Option<ConsensusResult>,
    pub failure: Option<SessionFailure>,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn from_session(session: &DebateSession) -> Self {
        Self {
            version: CURRENT_VERSION,
            session_id: session.id.clone(),
            topic: session.topic.clone(),
            roster: session
                .roster
                .agents()
                .iter()
                .map(|a| RosterEntry {
                    role: a.role,
                    display_name: a.display_name.clone(),
                    model: a.model.clone(),
                })
                .collect(),
            settings: session.settings.clone(),
            state: session.state,
            messages: session.messages.clone(),
            rounds: session.rounds.clone(),
            transitions: session.transitions.clone(),
            warnings: session.warnings.clone(),
            consensus: session.consensus.clone(),
            failure: session.failure.clone(),
            created_at: session.created_at,
            saved_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and check a stored record.
    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let record: Self = serde_json::from_str(json)?;
        if record.version != CURRENT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: record.version,
                expected: CURRENT_VERSION,
            });
        }
        record.validate()?;
        Ok(record)
    }

    /// Structural consistency checks.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        let inconsistent = |reason: String| PersistenceError::Inconsistent {
            id: self.session_id.clone(),
            reason,
        };

        for (i, message) in self.messages.iter().enumerate() {
            let expected = i as u64 + 1;
            if message.sequence != expected {
                return Err(inconsistent(format!(
                    "message {} has sequence {} (expected {expected})",
                    i, message.sequence
                )));
            }
        }
        if self.state == DebateState::Archived && self.consensus.is_none() {
            return Err(inconsistent("archived without a consensus result".into()));
        }
        if self.state == DebateState::Failed && self.failure.is_none() {
            return Err(inconsistent("failed without a failure record".into()));
        }
        if let Some(last) = self.transitions.last() {
            if last.to != self.state {
                return Err(inconsistent(format!(
                    "last transition ends in {} but state is {}",
                    last.to, self.state
                )));
            }
        }
        Ok(())
    }

    pub fn is_archived(&self) -> bool {
        self.state == DebateState::Archived
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.session_id.clone(),
            title: self.topic.title.clone(),
            state: self.state,
            message_count: self.messages.len(),
            saved_at: self.saved_at,
        }
    }

    /// Display name recorded for a role.
    pub fn speaker(&self, role: AgentRole) -> &str {
        self.roster
            .iter()
            .find(|e| e.role == role)
            .map_or(role.display_name(), |e| e.display_name.as_str())
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub state: DebateState,
    pub message_count: usize,
    pub saved_at: DateTime<Utc>,
}

/// Durable storage for debate records.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    fn name(&self) -> &str;

    /// Store a record, replacing any previous one with the same id.
    async fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError>;

    async fn load(&self, id: &str) -> Result<SessionRecord, PersistenceError>;

    /// Saved sessions, most recent first.
    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>, PersistenceError>;
}

fn check_id(id: &str) -> Result<(), PersistenceError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidId(id.to_string()))
    }
}

/// One pretty-printed `<id>.json` file per session.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    dir: PathBuf,
}

impl JsonFileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl SessionRepository for JsonFileRepository {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        check_id(&record.session_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?;

        let path = self.path_for(&record.session_id);
        let temp_path = path.with_extension("json.tmp");
        let content = record.to_json()?;

        // Write then rename so a crash never leaves a half-written record.
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;

        debug!(path = %path.display(), bytes = content.len(), "Session record written");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<SessionRecord, PersistenceError> {
        check_id(id)?;
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(id.to_string()))
            }
            Err(e) => return Err(PersistenceError::io(&path, e)),
        };
        SessionRecord::from_json(&content)
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        // Ids start with the creation timestamp.
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut summaries = Vec::new();
        for id in ids {
            if summaries.len() >= limit {
                break;
            }
            match self.load(&id).await {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable session record"),
            }
        }
        Ok(summaries)
    }
}

/// Repository that keeps serialised records in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: RwLock<BTreeMap<String, String>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Raw stored document.
    pub async fn raw(&self, id: &str) -> Option<String> {
        self.records.read().await.get(id).cloned()
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        check_id(&record.session_id)?;
        let json = record.to_json()?;
        self.records
            .write()
            .await
            .insert(record.session_id.clone(), json);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<SessionRecord, PersistenceError> {
        let records = self.records.read().await;
        let json = records
            .get(id)
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
        SessionRecord::from_json(json)
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>, PersistenceError> {
        let records = self.records.read().await;
        records
            .values()
            .rev()
            .take(limit)
            .map(|json| SessionRecord::from_json(json).map(|r| r.summary()))
            .collect()
    }
}
