//! Terminal output: live debate stream, saved transcripts, listings.

use std::fmt::Write as _;
use std::io::{self, Write};

use council::debate::{DebateEvent, DebateSession, DebateState, Stage};
use council::persistence::{SessionRecord, SessionSummary};
use council::prompts::{transcript_header, TRANSCRIPT_RULE};
use council::text::{normalize_whitespace, truncate_chars};

const TITLE_WIDTH: usize = 48;

/// Prints streamed chunks as they arrive, with a banner per stage and a
/// heading per speaker.
pub struct LiveRenderer<W: Write> {
    out: W,
    mid_line: bool,
}

impl<W: Write> LiveRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            mid_line: false,
        }
    }

    pub fn handle(&mut self, event: &DebateEvent) -> io::Result<()> {
        match event {
            DebateEvent::StateChanged { to, .. } => {
                if let Some(banner) = stage_banner(*to) {
                    self.end_line()?;
                    writeln!(self.out, "\n=== {banner} ===")?;
                }
            }
            DebateEvent::TurnStarted {
                speaker,
                stage,
                attempt,
                ..
            } => {
                self.end_line()?;
                if *attempt > 1 {
                    writeln!(self.out, "\n--- {speaker} ({stage}, attempt {attempt}) ---")?;
                } else {
                    writeln!(self.out, "\n--- {speaker} ({stage}) ---")?;
                }
            }
            DebateEvent::Chunk { text, .. } => {
                write!(self.out, "{text}")?;
                self.mid_line = !text.ends_with('\n');
            }
            DebateEvent::TurnRetry { cause, .. } => {
                self.end_line()?;
                writeln!(self.out, "[call failed: {cause}; retrying]")?;
            }
            DebateEvent::TurnCompleted { .. } => self.end_line()?,
            DebateEvent::SessionCreated { .. }
            | DebateEvent::BudgetWarning { .. }
            | DebateEvent::SessionFailed { .. } => {}
        }
        self.out.flush()
    }

    fn end_line(&mut self) -> io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

fn stage_banner(state: DebateState) -> Option<String> {
    match state {
        DebateState::Opening => Some("OPENING STATEMENTS".to_string()),
        DebateState::Rebuttal(i) => Some(format!("REBUTTAL ROUND {}", i + 1)),
        DebateState::Consensus => Some("CONSENSUS".to_string()),
        DebateState::Created | DebateState::Archived | DebateState::Failed => None,
    }
}

/// Closing summary after a run.
pub fn render_outcome(session: &DebateSession) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", session.status_line());
    if !session.warnings.is_empty() {
        let _ = writeln!(out, "{} budget warning(s):", session.warnings.len());
        for warning in &session.warnings {
            let _ = writeln!(out, "  - {warning}");
        }
    }
    match (&session.consensus, &session.failure) {
        (Some(consensus), _) if session.state == DebateState::Archived => {
            let _ = writeln!(
                out,
                "Consensus drafted from {} round {}.",
                consensus.source_round.stage, consensus.source_round.index
            );
        }
        (_, Some(failure)) => {
            let _ = writeln!(out, "Debate failed: {failure}");
        }
        _ => {}
    }
    out
}

/// Full transcript of a saved debate.
pub fn render_record(record: &SessionRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Debate: {}", record.topic.title);
    let _ = writeln!(out, "Id:     {}", record.session_id);
    let _ = writeln!(out, "State:  {}", record.state);
    let council: Vec<String> = record
        .roster
        .iter()
        .map(|e| format!("{} [{}]", e.display_name, e.model))
        .collect();
    let _ = writeln!(out, "Council: {}", council.join(", "));
    if !record.topic.description.is_empty() {
        let _ = writeln!(out, "\n{}", record.topic.description.trim());
    }

    let mut stage = None;
    for message in &record.messages {
        let current = (message.stage, message.round);
        if stage != Some(current) {
            let banner = match message.stage {
                Stage::Rebuttal => format!("REBUTTAL ROUND {}", message.round + 1),
                other => other.label().to_string(),
            };
            let _ = writeln!(out, "\n=== {banner} ===");
            stage = Some(current);
        }
        let _ = writeln!(
            out,
            "{}\n{}\n{}",
            transcript_header(message.sequence, message.stage, &message.speaker_name),
            message.text.trim(),
            TRANSCRIPT_RULE
        );
    }

    if let Some(consensus) = &record.consensus {
        if !consensus.recommendations.is_empty() {
            let _ = writeln!(out, "\n=== RECOMMENDATIONS ===\n{}", consensus.recommendations);
        }
    }
    if let Some(failure) = &record.failure {
        let _ = writeln!(out, "\nFAILED: {failure}");
    }
    out
}

/// One line per saved debate.
pub fn render_summaries(summaries: &[SessionSummary]) -> String {
    let mut out = String::new();
    for summary in summaries {
        let saved = summary.saved_at.with_timezone(&chrono::Local);
        let _ = writeln!(
            out,
            "{:<10} {:>3} msgs  {}  {}  {}",
            summary.state.to_string(),
            summary.message_count,
            saved.format("%Y-%m-%d %H:%M"),
            truncate_chars(&normalize_whitespace(&summary.title), TITLE_WIDTH),
            summary.id
        );
    }
    out
}
