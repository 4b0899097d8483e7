//! Debate orchestrator: drives a session through its stages.
//!
//! One call to [`DebateOrchestrator::advance`] performs one step: the
//! session start, or one agent turn followed by any stage transitions that
//! became due. [`DebateOrchestrator::run`] repeats that until the session
//! is `Archived` or `Failed`.
//!
//! Generation failures are retried up to `max_attempts`; a call that still
//! fails moves the session to `Failed` and is reported in the
//! [`StepReport`], not as an `Err`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{DebateEvent, EventBus, SharedEventBus};
use super::state::{
    ConsensusResult, DebateSession, DebateState, SessionFailure, Stage,
};
use super::topic::DebateTopic;
use crate::agent::{Agent, AgentRole, GenerationBackend, Roster};
use crate::budget::TokenBudgeter;
use crate::compressor::{CompressionMode, TranscriptCompressor};
use crate::config::CouncilConfig;
use crate::context_window::ContextWindowBuilder;
use crate::errors::{
    BudgetViolationWarning, ConfigurationError, DebateError, FailureCause, GenerationFailure,
    ViolationKind,
};
use crate::persistence::{PersistenceError, SessionRecord, SessionRepository};
use crate::prompts;

#[derive(Debug, Clone, Default)]
struct CancelTokens {
    stop: CancellationToken,
    abort: CancellationToken,
}

/// Cooperative and hard cancellation for a running debate.
///
/// A request stops one session: once a session has failed with
/// `Cancelled`, the orchestrator rearms the handle, so the next session
/// starts clean. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    tokens: Arc<Mutex<CancelTokens>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> CancelTokens {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Let the in-flight turn finish, then stop before the next one.
    pub fn cancel(&self) {
        self.current().stop.cancel();
    }

    /// Drop the in-flight stream and stop immediately.
    pub fn abort(&self) {
        let tokens = self.current();
        tokens.stop.cancel();
        tokens.abort.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.current().stop.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.current().abort.is_cancelled()
    }

    /// Clear any pending request.
    pub fn reset(&self) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = CancelTokens::default();
    }

    fn abort_token(&self) -> CancellationToken {
        self.current().abort
    }
}

/// What a single `advance` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// `Created → Opening`.
    Started,
    /// An agent turn committed a message.
    Turn {
        role: AgentRole,
        stage: Stage,
        round: u32,
        sequence: u64,
    },
    /// Only pending stage transitions were applied.
    Transitioned,
    /// The session moved to `Failed`.
    Failed(SessionFailure),
}

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub outcome: StepOutcome,
    /// Session state after the step.
    pub state: DebateState,
}

/// Prompt pieces for one turn.
struct TurnPrompt {
    context: String,
    instruction: String,
}

/// Drives debate sessions against a generation backend.
pub struct DebateOrchestrator {
    backend: Arc<dyn GenerationBackend>,
    budgeter: TokenBudgeter,
    events: SharedEventBus,
    cancel: CancelHandle,
}

impl DebateOrchestrator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            budgeter: TokenBudgeter::default(),
            events: EventBus::new().shared(),
            cancel: CancelHandle::new(),
        }
    }

    /// Use a different estimator. The session's truncation policy still
    /// applies.
    pub fn with_budgeter(mut self, budgeter: TokenBudgeter) -> Self {
        self.budgeter = budgeter;
        self
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    /// Share a cancellation handle created elsewhere.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn events(&self) -> SharedEventBus {
        Arc::clone(&self.events)
    }

    /// Handle for cancelling from another task (e.g. a signal handler).
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Validate input and create a session in `Created`.
    pub fn create_session(
        &self,
        topic: DebateTopic,
        roster: Roster,
        config: &CouncilConfig,
    ) -> Result<DebateSession, ConfigurationError> {
        config.validate()?;
        let session = DebateSession::create(topic, roster, config.session_settings())?;
        info!(
            session_id = %session.id,
            topic = %session.topic.title,
            experts = session.roster.debaters().count(),
            rounds = session.settings.max_rebuttal_rounds,
            backend = self.backend.name(),
            "Debate session created"
        );
        self.events.publish(DebateEvent::SessionCreated {
            session_id: session.id.clone(),
            topic: session.topic.title.clone(),
            timestamp: session.created_at,
        });
        Ok(session)
    }

    /// Drive the session until it is `Archived` or `Failed`.
    pub async fn run(&self, session: &mut DebateSession) -> Result<DebateState, DebateError> {
        while !session.is_complete() {
            self.advance(session).await?;
        }
        info!(
            session_id = %session.id,
            state = %session.state,
            messages = session.messages.len(),
            warnings = session.warnings.len(),
            "Debate finished"
        );
        Ok(session.state)
    }

    /// Perform one step.
    pub async fn advance(&self, session: &mut DebateSession) -> Result<StepReport, DebateError> {
        if session.is_complete() {
            return Err(DebateError::AlreadyComplete);
        }

        if self.cancel.is_cancelled() {
            let failure = SessionFailure {
                role: None,
                stage: session.state.stage(),
                round: session.state.round(),
                cause: FailureCause::Cancelled,
                attempts: 0,
                at: Utc::now(),
            };
            self.fail(session, failure.clone());
            return Ok(report(session, StepOutcome::Failed(failure)));
        }

        if session.state == DebateState::Created {
            self.transition(session, DebateState::Opening, "debate started")?;
            return Ok(report(session, StepOutcome::Started));
        }

        let (Some(agent), Some(stage)) = (session.pending_speaker().cloned(), session.state.stage())
        else {
            self.apply_due_transitions(session)?;
            return Ok(report(session, StepOutcome::Transitioned));
        };
        let round = session.state.round();

        let prompt = self.prepare_turn(session, &agent, stage, round);
        match self.execute_turn(session, &agent, stage, round, &prompt).await {
            Ok(text) => {
                let token_count = self.budgeter.estimate(&text);
                let sequence = session.append_message(&agent, text, token_count);
                info!(
                    session_id = %session.id,
                    role = %agent.role,
                    stage = %stage,
                    round,
                    sequence,
                    tokens = token_count,
                    "Turn completed"
                );
                self.events.publish(DebateEvent::TurnCompleted {
                    session_id: session.id.clone(),
                    role: agent.role,
                    stage,
                    round,
                    sequence,
                    token_count,
                    timestamp: Utc::now(),
                });

                if stage == Stage::Consensus {
                    if let Some(message) = session.messages.last() {
                        let result = ConsensusResult::from_message(message, session.consensus_source());
                        session.consensus = Some(result);
                    }
                }

                self.apply_due_transitions(session)?;
                Ok(report(
                    session,
                    StepOutcome::Turn {
                        role: agent.role,
                        stage,
                        round,
                        sequence,
                    },
                ))
            }
            Err((cause, attempts)) => {
                let err = GenerationFailure {
                    role: agent.role,
                    stage,
                    round,
                    cause: cause.clone(),
                };
                error!(session_id = %session.id, attempts, "{err}");
                let failure = SessionFailure {
                    role: Some(agent.role),
                    stage: Some(stage),
                    round,
                    cause,
                    attempts,
                    at: Utc::now(),
                };
                self.fail(session, failure.clone());
                Ok(report(session, StepOutcome::Failed(failure)))
            }
        }
    }

    /// Save a session (archived or failed) through a repository.
    pub async fn persist(
        &self,
        session: &DebateSession,
        repository: &dyn SessionRepository,
    ) -> Result<(), PersistenceError> {
        let record = SessionRecord::from_session(session);
        repository.save(&record).await?;
        info!(
            session_id = %session.id,
            state = %session.state,
            repository = repository.name(),
            "Debate record saved"
        );
        Ok(())
    }

    fn session_budgeter(&self, session: &DebateSession) -> TokenBudgeter {
        self.budgeter.with_truncation(session.settings.truncation)
    }

    fn prepare_turn(
        &self,
        session: &mut DebateSession,
        agent: &Agent,
        stage: Stage,
        round: u32,
    ) -> TurnPrompt {
        let budgeter = self.session_budgeter(session);
        let settings = session.settings.clone();

        match stage {
            Stage::Opening => TurnPrompt {
                context: format!(
                    "{}\n{}",
                    prompts::PRIOR_STATEMENTS_HEADING,
                    prompts::NO_PRIOR_STATEMENTS
                ),
                instruction: prompts::opening_instruction(&session.topic, &agent.display_name),
            },
            Stage::Rebuttal => {
                // Everything said so far, including earlier speakers in this round.
                let history: Vec<_> = session
                    .messages
                    .iter()
                    .filter(|m| m.stage != Stage::Consensus)
                    .cloned()
                    .collect();
                let builder = ContextWindowBuilder::new(budgeter, settings.message_overhead_tokens);
                let window = builder.build(&history, settings.rebuttal_context_tokens);
                if let Some(t) = window.truncation() {
                    self.record_warning(
                        session,
                        BudgetViolationWarning {
                            kind: ViolationKind::MessageTruncated,
                            role: agent.role,
                            stage,
                            round,
                            budget: settings.rebuttal_context_tokens,
                            original_tokens: t.original_tokens,
                            kept_tokens: t.kept_tokens,
                        },
                    );
                }
                debug!(
                    role = %agent.role,
                    round,
                    kept = window.len(),
                    omitted = window.omitted(),
                    tokens = window.total_tokens(),
                    "Rebuttal context prepared"
                );
                TurnPrompt {
                    context: format!(
                        "{}\n\n{}",
                        prompts::PRIOR_STATEMENTS_HEADING,
                        window.render_or(prompts::NO_PRIOR_STATEMENTS)
                    ),
                    instruction: prompts::rebuttal_instruction(
                        &session.topic,
                        &agent.display_name,
                        round,
                    ),
                }
            }
            Stage::Consensus => {
                let compressor = TranscriptCompressor::new(budgeter);
                let compressed =
                    compressor.compress(&session.debate_messages(), settings.consensus_context_tokens);
                let kind = match compressed.mode {
                    CompressionMode::Truncated => Some(ViolationKind::TranscriptTruncated),
                    CompressionMode::HeadersOnly => Some(ViolationKind::HeadersOverBudget),
                    CompressionMode::Passthrough | CompressionMode::LatestPerRole => None,
                };
                if let Some(kind) = kind {
                    self.record_warning(
                        session,
                        BudgetViolationWarning {
                            kind,
                            role: agent.role,
                            stage,
                            round,
                            budget: settings.consensus_context_tokens,
                            original_tokens: compressed.original_tokens,
                            kept_tokens: compressed.tokens,
                        },
                    );
                }
                TurnPrompt {
                    context: format!("Transcript:\n{}", compressed.text),
                    instruction: prompts::consensus_instruction(&session.topic),
                }
            }
        }
    }

    /// Run one turn with retries. Returns the committed text, or the last
    /// failure cause with the number of attempts made.
    async fn execute_turn(
        &self,
        session: &DebateSession,
        agent: &Agent,
        stage: Stage,
        round: u32,
        prompt: &TurnPrompt,
    ) -> Result<String, (FailureCause, u32)> {
        let timeout = Duration::from_secs(session.settings.call_timeout_secs);
        let max_attempts = session.settings.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(
                session_id = %session.id,
                role = %agent.role,
                model = %agent.model,
                stage = %stage,
                round,
                attempt,
                "Turn started"
            );
            self.events.publish(DebateEvent::TurnStarted {
                session_id: session.id.clone(),
                role: agent.role,
                speaker: agent.display_name.clone(),
                stage,
                round,
                attempt,
                timestamp: Utc::now(),
            });

            match self.attempt(&session.id, agent, attempt, prompt, timeout).await {
                Ok(text) => return Ok(text),
                Err(cause) if cause.is_retryable() && attempt < max_attempts => {
                    warn!(
                        session_id = %session.id,
                        role = %agent.role,
                        stage = %stage,
                        round,
                        attempt,
                        cause = %cause,
                        "Generation failed, retrying"
                    );
                    self.events.publish(DebateEvent::TurnRetry {
                        session_id: session.id.clone(),
                        role: agent.role,
                        stage,
                        round,
                        attempt,
                        cause,
                        timestamp: Utc::now(),
                    });
                }
                Err(cause) => return Err((cause, attempt)),
            }
        }
    }

    /// One generation call, consumed to completion under the timeout.
    async fn attempt(
        &self,
        session_id: &str,
        agent: &Agent,
        attempt: u32,
        prompt: &TurnPrompt,
        timeout: Duration,
    ) -> Result<String, FailureCause> {
        let call = async {
            let mut stream = agent
                .generate(self.backend.as_ref(), &prompt.context, &prompt.instruction)
                .await
                .map_err(|e| FailureCause::Backend(e.to_string()))?;

            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| FailureCause::Backend(e.to_string()))?;
                if chunk.is_empty() {
                    continue;
                }
                self.events.publish(DebateEvent::Chunk {
                    session_id: session_id.to_string(),
                    role: agent.role,
                    attempt,
                    text: chunk.clone(),
                });
                text.push_str(&chunk);
            }

            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(FailureCause::EmptyStream);
            }
            Ok::<String, FailureCause>(text)
        };

        let abort = self.cancel.abort_token();
        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(FailureCause::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(FailureCause::Timeout(timeout.as_secs())),
            },
        }
    }

    fn record_warning(&self, session: &mut DebateSession, warning: BudgetViolationWarning) {
        warn!(session_id = %session.id, "Budget violation: {warning}");
        self.events.publish(DebateEvent::BudgetWarning {
            session_id: session.id.clone(),
            warning: warning.clone(),
            timestamp: Utc::now(),
        });
        session.warnings.push(warning);
    }

    fn transition(
        &self,
        session: &mut DebateSession,
        to: DebateState,
        reason: &str,
    ) -> Result<(), DebateError> {
        let from = session.state;
        session.transition(to, reason)?;
        info!(session_id = %session.id, from = %from, to = %to, reason, "Debate state changed");
        self.events.publish(DebateEvent::StateChanged {
            session_id: session.id.clone(),
            from,
            to,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn apply_due_transitions(&self, session: &mut DebateSession) -> Result<(), DebateError> {
        while let Some(next) = session.due_transition() {
            let reason = match next {
                DebateState::Rebuttal(0) => "opening statements complete",
                DebateState::Rebuttal(_) => "rebuttal round complete",
                DebateState::Consensus => "debate rounds complete",
                DebateState::Archived => "consensus drafted",
                _ => "stage complete",
            };
            self.transition(session, next, reason)?;
        }
        Ok(())
    }

    fn fail(&self, session: &mut DebateSession, failure: SessionFailure) {
        let from = session.state;
        let reason = failure.to_string();
        if failure.cause == FailureCause::Cancelled {
            self.cancel.reset();
        }
        session.fail(failure.clone());
        error!(
            session_id = %session.id,
            from = %from,
            messages = session.messages.len(),
            "Debate failed: {reason}"
        );
        self.events.publish(DebateEvent::StateChanged {
            session_id: session.id.clone(),
            from,
            to: DebateState::Failed,
            reason,
            timestamp: Utc::now(),
        });
        self.events.publish(DebateEvent::SessionFailed {
            session_id: session.id.clone(),
            failure,
        });
    }
}

fn report(session: &DebateSession, outcome: StepOutcome) -> StepReport {
    StepReport {
        outcome,
        state: session.state,
    }
}
