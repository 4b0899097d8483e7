//! Debate state machine: stages, transitions and session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentRole, Roster};
use crate::budget::TruncationPolicy;
use crate::debate::topic::DebateTopic;
use crate::errors::{BudgetViolationWarning, ConfigurationError, FailureCause};

/// Upper bound on configurable rebuttal rounds.
pub const MAX_REBUTTAL_ROUNDS: u32 = 5;

/// Stage tag carried by rounds and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Opening,
    Rebuttal,
    Consensus,
}

impl Stage {
    /// Upper-case label used in transcripts and prompts.
    pub fn label(self) -> &'static str {
        match self {
            Self::Opening => "OPENING",
            Self::Rebuttal => "REBUTTAL",
            Self::Consensus => "CONSENSUS",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Rebuttal => write!(f, "rebuttal"),
            Self::Consensus => write!(f, "consensus"),
        }
    }
}

/// Position of a session in the debate state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "round")]
pub enum DebateState {
    /// Session created but not started.
    Created,
    /// Experts are giving opening statements.
    Opening,
    /// Rebuttal round `i` (0-based) is in progress.
    Rebuttal(u32),
    /// The consensus agent is drafting.
    Consensus,
    /// Consensus produced; the session is immutable.
    Archived,
    /// Stopped by an unrecovered failure or cancellation.
    Failed,
}

impl DebateState {
    /// Whether this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Archived | Self::Failed)
    }

    /// Stage a turn in this state belongs to.
    pub fn stage(self) -> Option<Stage> {
        match self {
            Self::Opening => Some(Stage::Opening),
            Self::Rebuttal(_) => Some(Stage::Rebuttal),
            Self::Consensus => Some(Stage::Consensus),
            Self::Created | Self::Archived | Self::Failed => None,
        }
    }

    /// Round index of a turn in this state (0 outside rebuttals).
    pub fn round(self) -> u32 {
        match self {
            Self::Rebuttal(i) => i,
            _ => 0,
        }
    }

    /// Whether the state machine has an edge `self → to`, ignoring the
    /// stage-completion preconditions checked by [`DebateSession`].
    pub fn can_transition_to(self, to: DebateState) -> bool {
        match (self, to) {
            (from, Self::Failed) => !from.is_terminal(),
            (Self::Created, Self::Opening) => true,
            (Self::Opening, Self::Rebuttal(0)) => true,
            (Self::Opening, Self::Consensus) => true,
            (Self::Rebuttal(i), Self::Rebuttal(j)) => j == i + 1,
            (Self::Rebuttal(_), Self::Consensus) => true,
            (Self::Consensus, Self::Archived) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DebateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Opening => write!(f, "opening"),
            Self::Rebuttal(i) => write!(f, "rebuttal({i})"),
            Self::Consensus => write!(f, "consensus"),
            Self::Archived => write!(f, "archived"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One committed statement. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Session-scoped sequence index, starting at 1 with no gaps.
    pub sequence: u64,
    pub author: AgentRole,
    pub speaker_name: String,
    pub stage: Stage,
    /// 0 for Opening and Consensus, `i` for Rebuttal(i).
    pub round: u32,
    pub text: String,
    pub token_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Record of one round: the messages each participant produced in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub stage: Stage,
    pub index: u32,
    /// Sequence indices of this round's messages, in roster order.
    pub messages: Vec<u64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A state transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateTransition {
    pub from: DebateState,
    pub to: DebateState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for illegal state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: DebateState,
    pub to: DebateState,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// Run-time settings frozen into a session at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Rebuttal rounds K.
    pub max_rebuttal_rounds: u32,
    pub rebuttal_context_tokens: u32,
    pub consensus_context_tokens: u32,
    /// Per-statement allowance for speaker labels and separators.
    pub message_overhead_tokens: u32,
    pub call_timeout_secs: u64,
    /// Attempts per agent call (first try plus retries).
    pub max_attempts: u32,
    pub truncation: TruncationPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_rebuttal_rounds: 1,
            rebuttal_context_tokens: 6000,
            consensus_context_tokens: 8000,
            message_overhead_tokens: 4,
            call_timeout_secs: 300,
            max_attempts: 2,
            truncation: TruncationPolicy::KeepLatest,
        }
    }
}

impl SessionSettings {
    /// Reject settings a session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_rebuttal_rounds > MAX_REBUTTAL_ROUNDS {
            return Err(ConfigurationError::InvalidRoundCount {
                requested: self.max_rebuttal_rounds,
                max: MAX_REBUTTAL_ROUNDS,
            });
        }
        if self.rebuttal_context_tokens == 0 {
            return Err(ConfigurationError::InvalidBudget(
                "rebuttal_context_tokens must be positive".into(),
            ));
        }
        if self.consensus_context_tokens == 0 {
            return Err(ConfigurationError::InvalidBudget(
                "consensus_context_tokens must be positive".into(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "call_timeout_secs",
                reason: "must be positive".into(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    /// Failing role, if a turn was in progress.
    pub role: Option<AgentRole>,
    pub stage: Option<Stage>,
    pub round: u32,
    pub cause: FailureCause,
    /// Attempts made for the failing call (0 when no call was made).
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.role, self.stage) {
            (Some(role), Some(stage)) => write!(
                f,
                "{} failed in {} round {} after {} attempt(s): {}",
                role, stage, self.round, self.attempts, self.cause
            ),
            _ => write!(f, "session stopped: {}", self.cause),
        }
    }
}

/// Reference to the last round whose statements fed the consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRef {
    pub stage: Stage,
    pub index: u32,
}

/// Final consensus, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub summary: String,
    pub recommendations: String,
    pub source_round: RoundRef,
    /// Sequence index of the consensus message.
    pub message_sequence: u64,
    pub drafted_by: AgentRole,
}

impl ConsensusResult {
    /// Split a consensus message into summary and recommendations at the
    /// policy / practical implications heading.
    pub fn from_message(message: &Message, source_round: RoundRef) -> Self {
        let (summary, recommendations) = split_recommendations(&message.text);
        Self {
            summary,
            recommendations,
            source_round,
            message_sequence: message.sequence,
            drafted_by: message.author,
        }
    }
}

const HEADING_KEYWORDS: [&str; 6] = [
    "policy",
    "policies",
    "practical",
    "implications",
    "recommendation",
    "recommendations",
];
const HEADING_FILLER: [&str; 4] = ["and", "if", "any", "implication"];

/// A line made only of the heading words, e.g. "4. Policy / practical
/// implications (if any)" or "### **Recommendations**:".
fn is_recommendations_heading(line: &str) -> bool {
    let lowered = line.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !w.chars().all(|c| c.is_ascii_digit()))
        .collect();
    !words.is_empty()
        && words.iter().any(|w| HEADING_KEYWORDS.contains(w))
        && words
            .iter()
            .all(|w| HEADING_KEYWORDS.contains(w) || HEADING_FILLER.contains(w))
}

/// Split at the last heading line; earlier matches are usually the
/// model restating the outline.
fn split_recommendations(text: &str) -> (String, String) {
    let mut offset = 0;
    let mut split = None;
    for line in text.split_inclusive('\n') {
        if is_recommendations_heading(line) {
            split = Some(offset);
        }
        offset += line.len();
    }
    match split {
        Some(at) => (text[..at].trim().to_string(), text[at..].trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}

/// A debate session tracking state and history.
///
/// Single writer: only the orchestrator mutates a session while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: String,
    pub topic: DebateTopic,
    pub roster: Roster,
    pub settings: SessionSettings,
    pub state: DebateState,
    pub messages: Vec<Message>,
    pub rounds: Vec<Round>,
    pub transitions: Vec<DebateTransition>,
    pub warnings: Vec<BudgetViolationWarning>,
    pub consensus: Option<ConsensusResult>,
    pub failure: Option<SessionFailure>,
    pub created_at: DateTime<Utc>,
}

impl DebateSession {
    /// Create a session in `Created`, rejecting unusable input.
    pub fn create(
        topic: DebateTopic,
        roster: Roster,
        settings: SessionSettings,
    ) -> Result<Self, ConfigurationError> {
        topic.validate()?;
        settings.validate()?;
        if roster.debaters().next().is_none() {
            return Err(ConfigurationError::NoDebaters);
        }

        let created_at = Utc::now();
        Ok(Self {
            id: session_id(&topic, created_at),
            topic,
            roster,
            settings,
            state: DebateState::Created,
            messages: Vec::new(),
            rounds: Vec::new(),
            transitions: Vec::new(),
            warnings: Vec::new(),
            consensus: None,
            failure: None,
            created_at,
        })
    }

    /// Transition to a new state with a reason.
    ///
    /// Checks both the edge and the stage-completion precondition, so a
    /// session can never skip or re-enter a stage.
    pub fn transition(&mut self, to: DebateState, reason: &str) -> Result<(), TransitionError> {
        let from = self.state;
        let reject = |why: String| TransitionError { from, to, reason: why };

        if !from.can_transition_to(to) {
            return Err(reject("no such edge".into()));
        }

        let k = self.settings.max_rebuttal_rounds;
        match (from, to) {
            (_, DebateState::Failed) | (DebateState::Created, DebateState::Opening) => {}
            (DebateState::Opening, DebateState::Rebuttal(0)) => {
                if !self.opening_complete() {
                    return Err(reject("opening statements incomplete".into()));
                }
                if k == 0 {
                    return Err(reject("no rebuttal rounds configured".into()));
                }
            }
            (DebateState::Opening, DebateState::Consensus) => {
                if !self.opening_complete() {
                    return Err(reject("opening statements incomplete".into()));
                }
                if k > 0 {
                    return Err(reject(format!("{k} rebuttal round(s) pending")));
                }
            }
            (DebateState::Rebuttal(i), DebateState::Rebuttal(next)) => {
                if !self.round_complete(i) {
                    return Err(reject(format!("rebuttal round {i} incomplete")));
                }
                if next >= k {
                    return Err(reject(format!("only {k} rebuttal round(s) configured")));
                }
            }
            (DebateState::Rebuttal(i), DebateState::Consensus) => {
                if !self.round_complete(i) {
                    return Err(reject(format!("rebuttal round {i} incomplete")));
                }
                if i + 1 < k {
                    return Err(reject(format!("rebuttal round {} pending", i + 1)));
                }
            }
            (DebateState::Consensus, DebateState::Archived) => {
                if self.consensus.is_none() {
                    return Err(reject("no consensus result".into()));
                }
            }
            _ => return Err(reject("no such edge".into())),
        }

        let now = Utc::now();
        if let Some(open) = self.rounds.last_mut().filter(|r| r.completed_at.is_none()) {
            open.completed_at = Some(now);
        }
        if let Some(stage) = to.stage() {
            self.rounds.push(Round {
                stage,
                index: to.round(),
                messages: Vec::new(),
                started_at: now,
                completed_at: None,
            });
        }

        self.transitions.push(DebateTransition {
            from,
            to,
            timestamp: now,
            reason: reason.to_string(),
        });
        self.state = to;
        Ok(())
    }

    /// Start the debate (Created → Opening).
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(DebateState::Opening, "debate started")
    }

    /// The next state due after the current stage completes, if any.
    pub fn due_transition(&self) -> Option<DebateState> {
        let k = self.settings.max_rebuttal_rounds;
        match self.state {
            DebateState::Opening if self.opening_complete() => Some(if k > 0 {
                DebateState::Rebuttal(0)
            } else {
                DebateState::Consensus
            }),
            DebateState::Rebuttal(i) if self.round_complete(i) => Some(if i + 1 < k {
                DebateState::Rebuttal(i + 1)
            } else {
                DebateState::Consensus
            }),
            DebateState::Consensus if self.consensus.is_some() => Some(DebateState::Archived),
            _ => None,
        }
    }

    /// Agent whose turn is next in the current state, in roster order.
    pub fn pending_speaker(&self) -> Option<&Agent> {
        match self.state {
            DebateState::Opening | DebateState::Rebuttal(_) => {
                let (stage, round) = (self.state.stage()?, self.state.round());
                self.roster
                    .debaters()
                    .find(|agent| !self.has_spoken(agent.role, stage, round))
            }
            DebateState::Consensus if self.consensus.is_none() => {
                Some(self.roster.consensus_agent())
            }
            _ => None,
        }
    }

    fn has_spoken(&self, role: AgentRole, stage: Stage, round: u32) -> bool {
        self.messages
            .iter()
            .any(|m| m.author == role && m.stage == stage && m.round == round)
    }

    /// Whether every debater has an Opening message.
    pub fn opening_complete(&self) -> bool {
        self.roster
            .debaters()
            .all(|agent| self.has_spoken(agent.role, Stage::Opening, 0))
    }

    /// Whether every debater has a message in rebuttal round `i`.
    pub fn round_complete(&self, i: u32) -> bool {
        self.roster
            .debaters()
            .all(|agent| self.has_spoken(agent.role, Stage::Rebuttal, i))
    }

    /// Append a completed statement for the pending speaker.
    ///
    /// Returns the new sequence index. The caller guarantees `author` is
    /// the pending speaker of the current state.
    pub(crate) fn append_message(&mut self, author: &Agent, text: String, token_count: u32) -> u64 {
        let sequence = self.messages.last().map_or(1, |m| m.sequence + 1);
        let stage = self.state.stage().unwrap_or(Stage::Opening);
        self.messages.push(Message {
            sequence,
            author: author.role,
            speaker_name: author.display_name.clone(),
            stage,
            round: self.state.round(),
            text,
            token_count,
            timestamp: Utc::now(),
        });
        if let Some(round) = self.rounds.last_mut() {
            round.messages.push(sequence);
        }
        sequence
    }

    /// Round whose statements the consensus is drawn from.
    pub fn consensus_source(&self) -> RoundRef {
        match self.settings.max_rebuttal_rounds {
            0 => RoundRef {
                stage: Stage::Opening,
                index: 0,
            },
            k => RoundRef {
                stage: Stage::Rebuttal,
                index: k - 1,
            },
        }
    }

    /// Move to `Failed`, recording why. No-op on terminal sessions.
    pub fn fail(&mut self, failure: SessionFailure) {
        if self.state.is_terminal() {
            return;
        }
        let reason = failure.to_string();
        if self.transition(DebateState::Failed, &reason).is_ok() {
            self.failure = Some(failure);
        }
    }

    /// Messages of one stage, in sequence order.
    pub fn messages_in(&self, stage: Stage) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.stage == stage)
    }

    /// Opening and rebuttal statements (everything but the consensus).
    pub fn debate_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.stage != Stage::Consensus)
            .cloned()
            .collect()
    }

    /// Whether the debate has ended.
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} messages | {} rebuttal round(s) | topic={}",
            self.state,
            self.messages.len(),
            self.settings.max_rebuttal_rounds,
            self.topic.id
        )
    }
}

/// `<yyyymmddThhmmssZ>_<topic-id>_<8 hex>`: sortable by creation time.
fn session_id(topic: &DebateTopic, at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        at.format("%Y%m%dT%H%M%SZ"),
        topic.id,
        &suffix[..8]
    )
}
