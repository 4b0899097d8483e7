//! Full debate runs against the scripted backend (no model server).
//!
//! Covers: roster → orchestrator → context windows → compression →
//! consensus → persistence, plus retry, timeout and cancellation paths.

use std::sync::Arc;
use std::time::Duration;

use council::debate::{DebateEvent, RoundRef, SessionSettings};
use council::persistence::DEFAULT_LIST_LIMIT;
use council::{
    Agent, AgentRole, CancelHandle, CouncilConfig, DebateOrchestrator, DebateSession, DebateState,
    DebateTopic, FailureCause, InMemoryRepository, JsonFileRepository, Roster, ScriptedBackend,
    ScriptedFailure, SessionRecord, SessionRepository, Stage,
};

fn two_experts() -> Roster {
    Roster::new(vec![
        Agent::new(AgentRole::IndianHistorian, "gpt-oss:latest"),
        Agent::new(AgentRole::CivilizationalHistorian, "gpt-oss:latest"),
        Agent::new(AgentRole::PolicymakerExpert, "gpt-oss:latest"),
    ])
    .unwrap()
}

fn config(rounds: u32) -> CouncilConfig {
    CouncilConfig {
        max_rebuttal_rounds: rounds,
        ..CouncilConfig::default()
    }
}

fn topic() -> DebateTopic {
    DebateTopic::new("Did the Vedic period begin before 1500 BCE?")
        .with_description("Weigh archaeological, linguistic and textual evidence.")
}

fn new_session(orch: &DebateOrchestrator, rounds: u32) -> DebateSession {
    orch.create_session(topic(), two_experts(), &config(rounds))
        .unwrap()
}

/// Replies that carry the consensus structure when asked for it.
fn structured_backend() -> ScriptedBackend {
    ScriptedBackend::with_responder(|req, i| {
        if req.user_content.contains("Stage: CONSENSUS") {
            "1. Core factual points\nTextual dating is relative.\n\n\
             2. Key disagreements\nThe weight of linguistic evidence.\n\n\
             3. Provisional conclusion\nNo firm date before 1500 BCE.\n\n\
             4. Policy / practical implications\nFund more excavation."
                .to_string()
        } else {
            format!("Statement {i}: the evidence points both ways.")
        }
    })
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_one_rebuttal_round_archives() {
    let orch = DebateOrchestrator::new(Arc::new(structured_backend()));
    let mut session = new_session(&orch, 1);

    let state = orch.run(&mut session).await.unwrap();
    assert_eq!(state, DebateState::Archived);

    assert_eq!(session.messages_in(Stage::Opening).count(), 2);
    assert_eq!(session.messages_in(Stage::Rebuttal).count(), 2);
    assert_eq!(session.messages_in(Stage::Consensus).count(), 1);

    let sequences: Vec<u64> = session.messages.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

    let authors: Vec<AgentRole> = session.messages.iter().map(|m| m.author).collect();
    assert_eq!(
        authors,
        vec![
            AgentRole::IndianHistorian,
            AgentRole::CivilizationalHistorian,
            AgentRole::IndianHistorian,
            AgentRole::CivilizationalHistorian,
            AgentRole::PolicymakerExpert,
        ]
    );

    let path: Vec<DebateState> = session.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        path,
        vec![
            DebateState::Opening,
            DebateState::Rebuttal(0),
            DebateState::Consensus,
            DebateState::Archived,
        ]
    );

    let consensus = session.consensus.as_ref().unwrap();
    assert_eq!(consensus.drafted_by, AgentRole::PolicymakerExpert);
    assert_eq!(
        consensus.source_round,
        RoundRef {
            stage: Stage::Rebuttal,
            index: 0
        }
    );
    assert!(consensus.summary.starts_with("1. Core factual points"));
    assert!(consensus.summary.contains("Provisional conclusion"));
    assert!(consensus
        .recommendations
        .starts_with("4. Policy / practical implications"));
    assert!(session.warnings.is_empty());
    assert!(session.failure.is_none());
}

#[tokio::test]
async fn test_zero_rebuttal_rounds_goes_straight_to_consensus() {
    let orch = DebateOrchestrator::new(Arc::new(structured_backend()));
    let mut session = new_session(&orch, 0);

    assert_eq!(orch.run(&mut session).await.unwrap(), DebateState::Archived);
    assert_eq!(session.messages.len(), 3);
    assert_eq!(session.messages_in(Stage::Rebuttal).count(), 0);
    assert_eq!(
        session.consensus.as_ref().unwrap().source_round,
        RoundRef {
            stage: Stage::Opening,
            index: 0
        }
    );
    assert!(!session
        .transitions
        .iter()
        .any(|t| matches!(t.to, DebateState::Rebuttal(_))));
}

#[tokio::test]
async fn test_max_rounds_run_in_order() {
    let orch = DebateOrchestrator::new(Arc::new(ScriptedBackend::new()));
    let mut session = new_session(&orch, 3);
    orch.run(&mut session).await.unwrap();

    assert_eq!(session.messages.len(), 2 + 3 * 2 + 1);
    let rebuttal_rounds: Vec<u32> = session
        .messages_in(Stage::Rebuttal)
        .map(|m| m.round)
        .collect();
    assert_eq!(rebuttal_rounds, vec![0, 0, 1, 1, 2, 2]);
    // Opening + 3 rebuttal rounds + consensus.
    assert_eq!(session.rounds.len(), 5);
    assert!(session.rounds.iter().all(|r| r.completed_at.is_some()));
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_rebuttal_timeout_twice_fails_session() {
    let backend = ScriptedBackend::new().fail_matching(
        Some("CIVILIZATIONAL HISTORIAN"),
        Some("Stage: REBUTTAL"),
        2,
        ScriptedFailure::Hang,
    );
    let orch = DebateOrchestrator::new(Arc::new(backend));
    let mut session = new_session(&orch, 1);

    assert_eq!(orch.run(&mut session).await.unwrap(), DebateState::Failed);

    // Both openings and the first rebuttal survive.
    assert_eq!(session.messages.len(), 3);
    assert_eq!(session.messages[2].author, AgentRole::IndianHistorian);
    assert_eq!(session.messages[2].stage, Stage::Rebuttal);

    let failure = session.failure.as_ref().unwrap();
    assert_eq!(failure.role, Some(AgentRole::CivilizationalHistorian));
    assert_eq!(failure.stage, Some(Stage::Rebuttal));
    assert_eq!(failure.round, 0);
    assert_eq!(failure.cause, FailureCause::Timeout(300));
    assert_eq!(failure.attempts, 2);
    assert!(session.consensus.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_single_timeout_recovers() {
    let backend = ScriptedBackend::new().fail_matching(
        Some("POLICYMAKER"),
        None,
        1,
        ScriptedFailure::Hang,
    );
    let orch = DebateOrchestrator::new(Arc::new(backend));
    let mut session = new_session(&orch, 1);
    assert_eq!(orch.run(&mut session).await.unwrap(), DebateState::Archived);
    assert_eq!(session.messages.len(), 5);
}

#[tokio::test]
async fn test_backend_error_in_consensus_keeps_transcript() {
    let backend = ScriptedBackend::new().fail_matching(
        None,
        Some("Stage: CONSENSUS"),
        2,
        ScriptedFailure::Error("HTTP 500".into()),
    );
    let orch = DebateOrchestrator::new(Arc::new(backend));
    let mut session = new_session(&orch, 1);

    assert_eq!(orch.run(&mut session).await.unwrap(), DebateState::Failed);
    assert_eq!(session.messages.len(), 4);
    let failure = session.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Some(Stage::Consensus));
    assert!(matches!(failure.cause, FailureCause::Backend(ref m) if m.contains("HTTP 500")));
}

// ── Cancellation ────────────────────────────────────────────────────

#[tokio::test]
async fn test_cooperative_cancel_commits_in_flight_turn() {
    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    let backend = ScriptedBackend::with_responder(move |_, i| {
        // Cancel while the third call (first rebuttal) is being answered.
        if i == 2 {
            trigger.cancel();
        }
        format!("Statement {i}.")
    });
    let orch = DebateOrchestrator::new(Arc::new(backend)).with_cancel_handle(cancel);
    let mut session = new_session(&orch, 1);

    assert_eq!(orch.run(&mut session).await.unwrap(), DebateState::Failed);
    assert_eq!(session.messages.len(), 3);
    assert_eq!(session.messages[2].text, "Statement 2.");

    let failure = session.failure.as_ref().unwrap();
    assert_eq!(failure.cause, FailureCause::Cancelled);
    assert_eq!(failure.role, None);
    assert_eq!(failure.attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_drops_in_flight_stream() {
    let backend = ScriptedBackend::new().fail_matching(
        Some("CIVILIZATIONAL HISTORIAN"),
        Some("Stage: OPENING"),
        1,
        ScriptedFailure::Hang,
    );
    let orch = DebateOrchestrator::new(Arc::new(backend));
    let handle = orch.cancel_handle();
    let mut session = new_session(&orch, 1);

    let aborter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.abort();
    });

    assert_eq!(orch.run(&mut session).await.unwrap(), DebateState::Failed);
    aborter.await.unwrap();

    assert_eq!(session.messages.len(), 1);
    let failure = session.failure.as_ref().unwrap();
    assert_eq!(failure.cause, FailureCause::Cancelled);
    assert_eq!(failure.role, Some(AgentRole::CivilizationalHistorian));
    assert_eq!(failure.attempts, 1);
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chunk_events_reassemble_messages() {
    let backend = ScriptedBackend::with_responder(|_, i| format!("short reply {i}"));
    let orch = DebateOrchestrator::new(Arc::new(backend));
    let mut rx = orch.events().subscribe();
    let mut session = new_session(&orch, 0);
    orch.run(&mut session).await.unwrap();

    let mut first_turn = String::new();
    let mut states = Vec::new();
    let mut completed = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            DebateEvent::Chunk { role, text, .. } if role == AgentRole::IndianHistorian => {
                first_turn.push_str(&text)
            }
            DebateEvent::StateChanged { to, .. } => states.push(to),
            DebateEvent::TurnCompleted { .. } => completed += 1,
            _ => {}
        }
    }
    assert_eq!(first_turn, session.messages[0].text);
    assert_eq!(completed, 3);
    assert_eq!(
        states,
        vec![
            DebateState::Opening,
            DebateState::Consensus,
            DebateState::Archived
        ]
    );
}

// ── Budgets ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tiny_consensus_budget_keeps_every_role() {
    let backend = ScriptedBackend::with_responder(|_, i| format!("{i} ").repeat(400));
    let mut config = config(2);
    config.budgets.consensus_context_tokens = 120;
    let orch = DebateOrchestrator::new(Arc::new(backend));
    let mut session = orch
        .create_session(topic(), two_experts(), &config)
        .unwrap();

    assert_eq!(orch.run(&mut session).await.unwrap(), DebateState::Archived);
    assert!(!session.warnings.is_empty());
    let consensus_prompt = session
        .warnings
        .iter()
        .find(|w| w.stage == Stage::Consensus)
        .unwrap();
    assert_eq!(consensus_prompt.budget, 120);
    assert!(consensus_prompt.kept_tokens <= 120);
}

// ── Persistence ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_archived_session_round_trips_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let repo = JsonFileRepository::new(dir.path());
    let orch = DebateOrchestrator::new(Arc::new(structured_backend()));
    let mut session = new_session(&orch, 1);
    orch.run(&mut session).await.unwrap();

    orch.persist(&session, &repo).await.unwrap();

    let loaded = repo.load(&session.id).await.unwrap();
    assert!(loaded.is_archived());
    assert_eq!(loaded.messages, session.messages);
    assert_eq!(loaded.consensus, session.consensus);
    assert_eq!(loaded.topic, session.topic);
    assert_eq!(loaded.roster.len(), 3);

    let on_disk = std::fs::read_to_string(repo.path_for(&session.id)).unwrap();
    assert_eq!(loaded.to_json().unwrap(), on_disk);

    let listed = repo.list(DEFAULT_LIST_LIMIT).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, session.id);
}

#[tokio::test]
async fn test_failed_session_is_persistable() {
    let backend = ScriptedBackend::new().fail_matching(
        Some("INDIAN HISTORIAN"),
        None,
        2,
        ScriptedFailure::Empty,
    );
    let repo = InMemoryRepository::new();
    let orch = DebateOrchestrator::new(Arc::new(backend));
    let mut session = new_session(&orch, 1);
    orch.run(&mut session).await.unwrap();
    orch.persist(&session, &repo).await.unwrap();

    let record: SessionRecord = repo.load(&session.id).await.unwrap();
    assert_eq!(record.state, DebateState::Failed);
    assert!(!record.is_archived());
    assert!(record.messages.is_empty());
    assert_eq!(record.failure.unwrap().cause, FailureCause::EmptyStream);
    assert_eq!(record.settings, SessionSettings::default());
}
