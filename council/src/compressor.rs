//! Transcript compression for the consensus stage.
//!
//! Three steps, stopping at the first that fits the budget:
//! 1. pass the full transcript through,
//! 2. keep only each role's latest statement,
//! 3. truncate those statements in proportion to their size.
//!
//! Every role that spoke is represented in the output, even when the
//! statement headers alone exceed the budget.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::AgentRole;
use crate::budget::TokenBudgeter;
use crate::debate::state::Message;
use crate::prompts;

/// Which reduction produced a [`CompressedTranscript`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    /// The full transcript fit.
    Passthrough,
    /// Only the latest statement per role was kept.
    LatestPerRole,
    /// Retained statements were truncated proportionally.
    Truncated,
    /// Headers alone exceed the budget; statement bodies were dropped.
    HeadersOnly,
}

/// Output of [`TranscriptCompressor::compress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedTranscript {
    /// Rendered transcript handed to the consensus agent.
    pub text: String,
    /// The statements behind `text`, with truncated bodies where cut.
    pub messages: Vec<Message>,
    pub mode: CompressionMode,
    pub original_tokens: u32,
    pub tokens: u32,
    pub budget: u32,
}

impl CompressedTranscript {
    /// Roles represented in the output.
    pub fn roles(&self) -> Vec<AgentRole> {
        let mut roles: Vec<AgentRole> = self.messages.iter().map(|m| m.author).collect();
        roles.sort();
        roles.dedup();
        roles
    }
}

/// Reduces an opening + rebuttal transcript to a consensus budget.
#[derive(Debug, Clone, Default)]
pub struct TranscriptCompressor {
    budgeter: TokenBudgeter,
}

impl TranscriptCompressor {
    pub fn new(budgeter: TokenBudgeter) -> Self {
        Self { budgeter }
    }

    /// Render statements as `[seq | STAGE | Speaker]` blocks closed by a
    /// rule line.
    pub fn render(&self, messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| {
                format!(
                    "{}\n{}\n{}",
                    prompts::transcript_header(m.sequence, m.stage, &m.speaker_name),
                    m.text.trim(),
                    prompts::TRANSCRIPT_RULE
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Compress `messages` to fit `budget` tokens.
    pub fn compress(&self, messages: &[Message], budget: u32) -> CompressedTranscript {
        let full = self.render(messages);
        let original_tokens = self.budgeter.estimate(&full);
        if original_tokens <= budget {
            return self.finish(messages.to_vec(), full, CompressionMode::Passthrough, original_tokens, budget);
        }

        let retained = latest_per_role(messages);
        let text = self.render(&retained);
        if self.budgeter.fits(&text, budget) {
            return self.finish(retained, text, CompressionMode::LatestPerRole, original_tokens, budget);
        }

        let shells: Vec<Message> = retained
            .iter()
            .map(|m| Message {
                text: String::new(),
                token_count: 0,
                ..m.clone()
            })
            .collect();
        let shell_tokens = self.budgeter.estimate(&self.render(&shells));
        if shell_tokens > budget {
            let text = self.render(&shells);
            return self.finish(shells, text, CompressionMode::HeadersOnly, original_tokens, budget);
        }

        let available = budget - shell_tokens;
        let sizes: Vec<u32> = retained
            .iter()
            .map(|m| self.budgeter.estimate(m.text.trim()))
            .collect();
        let total: u64 = sizes.iter().map(|&s| u64::from(s)).sum::<u64>().max(1);
        let mut shares: Vec<u32> = sizes
            .iter()
            .map(|&s| (u64::from(available) * u64::from(s) / total) as u32)
            .collect();

        loop {
            let cut: Vec<Message> = retained
                .iter()
                .zip(&shares)
                .map(|(m, &share)| {
                    let text = self.budgeter.truncate(m.text.trim(), share).trim().to_string();
                    Message {
                        token_count: self.budgeter.estimate(&text),
                        text,
                        ..m.clone()
                    }
                })
                .collect();
            let text = self.render(&cut);
            if self.budgeter.fits(&text, budget) || shares.iter().all(|&s| s == 0) {
                return self.finish(cut, text, CompressionMode::Truncated, original_tokens, budget);
            }
            // Estimators that do not add up across blocks can overshoot;
            // shrink every share and try again.
            for share in &mut shares {
                *share = share.saturating_sub(*share / 10 + 1);
            }
        }
    }

    fn finish(
        &self,
        messages: Vec<Message>,
        text: String,
        mode: CompressionMode,
        original_tokens: u32,
        budget: u32,
    ) -> CompressedTranscript {
        let tokens = self.budgeter.estimate(&text);
        debug!(
            mode = ?mode,
            statements = messages.len(),
            original_tokens,
            tokens,
            budget,
            "Compressed transcript"
        );
        CompressedTranscript {
            text,
            messages,
            mode,
            original_tokens,
            tokens,
            budget,
        }
    }
}

/// Each role's most recent statement, in chronological order.
fn latest_per_role(messages: &[Message]) -> Vec<Message> {
    let mut latest: BTreeMap<AgentRole, &Message> = BTreeMap::new();
    for message in messages {
        latest
            .entry(message.author)
            .and_modify(|held| {
                if message.sequence > held.sequence {
                    *held = message;
                }
            })
            .or_insert(message);
    }
    let mut retained: Vec<Message> = latest.into_values().cloned().collect();
    retained.sort_by_key(|m| m.sequence);
    retained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::state::Stage;
    use chrono::Utc;

    const ROLES: [AgentRole; 3] = [
        AgentRole::IndianHistorian,
        AgentRole::ReligionExpert,
        AgentRole::AnthropologyExpert,
    ];

    /// Opening plus `rounds` rebuttal rounds for three experts.
    fn transcript(rounds: u32, words: usize) -> Vec<Message> {
        let mut out = Vec::new();
        let mut seq = 0;
        for round in 0..=rounds {
            for role in ROLES {
                seq += 1;
                let stage = if round == 0 { Stage::Opening } else { Stage::Rebuttal };
                out.push(Message {
                    sequence: seq,
                    author: role,
                    speaker_name: role.display_name().to_string(),
                    stage,
                    round: round.saturating_sub(1),
                    text: format!("{} says {}", role.as_str(), "evidence ".repeat(words)),
                    token_count: 0,
                    timestamp: Utc::now(),
                });
            }
        }
        out
    }

    #[test]
    fn test_passthrough_when_fits() {
        let c = TranscriptCompressor::default();
        let msgs = transcript(1, 5);
        let out = c.compress(&msgs, 100_000);
        assert_eq!(out.mode, CompressionMode::Passthrough);
        assert_eq!(out.messages, msgs);
        assert_eq!(out.text, c.render(&msgs));
        assert_eq!(out.original_tokens, out.tokens);
    }

    #[test]
    fn test_render_format() {
        let c = TranscriptCompressor::default();
        let msgs = transcript(0, 1);
        let text = c.render(&msgs[..1]);
        assert_eq!(
            text,
            "[1 | OPENING | Indian Historian]\nindian_historian says evidence\n----------------------------------------"
        );
    }

    #[test]
    fn test_latest_per_role() {
        let c = TranscriptCompressor::default();
        let msgs = transcript(2, 30);
        let latest_text = c.render(&msgs[6..]);
        let budget = c.budgeter.estimate(&latest_text);
        let out = c.compress(&msgs, budget);
        assert_eq!(out.mode, CompressionMode::LatestPerRole);
        let seqs: Vec<u64> = out.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![7, 8, 9]);
    }

    #[test]
    fn test_proportional_truncation_keeps_every_role() {
        let c = TranscriptCompressor::default();
        let msgs = transcript(2, 200);
        let out = c.compress(&msgs, 200);
        assert_eq!(out.mode, CompressionMode::Truncated);
        assert!(out.tokens <= 200);
        assert_eq!(out.roles(), {
            let mut r = ROLES.to_vec();
            r.sort();
            r
        });
        assert!(out.messages.iter().all(|m| !m.text.is_empty()));
    }

    #[test]
    fn test_headers_only_when_budget_tiny() {
        let c = TranscriptCompressor::default();
        let msgs = transcript(1, 50);
        let out = c.compress(&msgs, 5);
        assert_eq!(out.mode, CompressionMode::HeadersOnly);
        assert_eq!(out.messages.len(), 3);
        assert!(out.messages.iter().all(|m| m.text.is_empty()));
        assert!(out.text.contains("| Religion Expert]"));
    }

    #[test]
    fn test_headers_exactly_at_budget_are_not_degenerate() {
        let c = TranscriptCompressor::default();
        let msgs = transcript(1, 50);
        let shells: Vec<Message> = latest_per_role(&msgs)
            .into_iter()
            .map(|m| Message {
                text: String::new(),
                ..m
            })
            .collect();
        let budget = c.budgeter.estimate(&c.render(&shells));

        let out = c.compress(&msgs, budget);
        assert_eq!(out.mode, CompressionMode::Truncated);
        assert!(out.tokens <= budget);
        assert_eq!(out.messages.len(), 3);

        let below = c.compress(&msgs, budget - 1);
        assert_eq!(below.mode, CompressionMode::HeadersOnly);
    }

    #[test]
    fn test_idempotent_on_fitting_output() {
        let c = TranscriptCompressor::default();
        let msgs = transcript(3, 120);
        for budget in [150, 400, 900] {
            let once = c.compress(&msgs, budget);
            assert!(once.tokens <= budget);
            let twice = c.compress(&once.messages, budget);
            assert_eq!(twice.mode, CompressionMode::Passthrough);
            assert_eq!(twice.text, once.text);
            assert_eq!(twice.messages, once.messages);
        }
    }

    #[test]
    fn test_empty_transcript() {
        let out = TranscriptCompressor::default().compress(&[], 10);
        assert_eq!(out.mode, CompressionMode::Passthrough);
        assert!(out.text.is_empty());
    }
}
