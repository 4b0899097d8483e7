//! Context window construction for rebuttal turns.
//!
//! Walks the history newest to oldest and keeps the longest recent run of
//! statements that fits the token budget. Each statement costs the estimate
//! of its labelled block plus a fixed per-message overhead.

use tracing::debug;

use crate::agent::AgentRole;
use crate::budget::TokenBudgeter;
use crate::debate::state::{Message, Stage};
use crate::prompts;

/// One labelled statement inside a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub sequence: u64,
    pub author: AgentRole,
    pub stage: Stage,
    pub round: u32,
    /// `"<Speaker> (<stage>, #<sequence>):"`, empty when it did not fit.
    pub label: String,
    pub text: String,
    /// Cost of this entry including the per-message overhead.
    pub tokens: u32,
    pub truncated: bool,
}

impl WindowEntry {
    /// Label and text as shown to the agent.
    pub fn render(&self) -> String {
        match (self.label.is_empty(), self.text.is_empty()) {
            (true, _) => self.text.clone(),
            (false, true) => self.label.clone(),
            (false, false) => format!("{}\n{}", self.label, self.text),
        }
    }
}

/// Reduction applied to the newest message when it alone exceeded the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTruncation {
    pub sequence: u64,
    pub original_tokens: u32,
    pub kept_tokens: u32,
}

/// Bounded, chronologically ordered subset of prior statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    entries: Vec<WindowEntry>,
    total_tokens: u32,
    budget: u32,
    omitted: usize,
    truncation: Option<WindowTruncation>,
}

impl ContextWindow {
    /// A window with nothing in it.
    pub fn empty(budget: u32) -> Self {
        Self {
            entries: Vec::new(),
            total_tokens: 0,
            budget,
            omitted: 0,
            truncation: None,
        }
    }

    pub fn entries(&self) -> &[WindowEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Accounted cost of all entries (never above the budget).
    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Older messages left out of the window.
    pub fn omitted(&self) -> usize {
        self.omitted
    }

    pub fn truncation(&self) -> Option<WindowTruncation> {
        self.truncation
    }

    /// Entries joined by blank lines, oldest first.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(WindowEntry::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Rendered window, or `fallback` when empty.
    pub fn render_or(&self, fallback: &str) -> String {
        if self.is_empty() {
            fallback.to_string()
        } else {
            self.render()
        }
    }
}

/// Builds [`ContextWindow`]s from a message history.
#[derive(Debug, Clone)]
pub struct ContextWindowBuilder {
    budgeter: TokenBudgeter,
    message_overhead: u32,
}

impl ContextWindowBuilder {
    /// `message_overhead` is charged once per entry and is at least 1, which
    /// also pays for the blank-line separators in [`ContextWindow::render`].
    pub fn new(budgeter: TokenBudgeter, message_overhead: u32) -> Self {
        Self {
            budgeter,
            message_overhead: message_overhead.max(1),
        }
    }

    /// Select the most recent messages of `history` whose cost fits `budget`.
    pub fn build(&self, history: &[Message], budget: u32) -> ContextWindow {
        let Some(newest) = history.last() else {
            return ContextWindow::empty(budget);
        };

        let mut selected = Vec::new();
        let mut total: u32 = 0;
        for message in history.iter().rev() {
            let entry = self.entry(message);
            match total.checked_add(entry.tokens) {
                Some(next) if next <= budget => {
                    total = next;
                    selected.push(entry);
                }
                _ => break,
            }
        }

        let mut truncation = None;
        if selected.is_empty() {
            let original = self.entry(newest).tokens;
            let entry = self.truncated_entry(newest, budget);
            truncation = Some(WindowTruncation {
                sequence: newest.sequence,
                original_tokens: original,
                kept_tokens: entry.tokens,
            });
            total = entry.tokens;
            selected.push(entry);
        }

        selected.reverse();
        let omitted = history.len() - selected.len();
        debug!(
            budget,
            total_tokens = total,
            kept = selected.len(),
            omitted,
            truncated = truncation.is_some(),
            "Built context window"
        );

        ContextWindow {
            entries: selected,
            total_tokens: total,
            budget,
            omitted,
            truncation,
        }
    }

    fn label(message: &Message) -> String {
        prompts::statement_label(&message.speaker_name, message.stage, message.sequence)
    }

    fn entry(&self, message: &Message) -> WindowEntry {
        let label = Self::label(message);
        let block = format!("{label}\n{}", message.text);
        WindowEntry {
            sequence: message.sequence,
            author: message.author,
            stage: message.stage,
            round: message.round,
            tokens: self.budgeter.estimate(&block) + self.message_overhead,
            label,
            text: message.text.clone(),
            truncated: false,
        }
    }

    /// Shrink a single message into `budget`: keep the label when it fits
    /// alongside some text, drop it otherwise, and fall back to an empty
    /// entry when not even the overhead fits.
    fn truncated_entry(&self, message: &Message, budget: u32) -> WindowEntry {
        let mut entry = WindowEntry {
            sequence: message.sequence,
            author: message.author,
            stage: message.stage,
            round: message.round,
            label: String::new(),
            text: String::new(),
            tokens: 0,
            truncated: true,
        };
        if budget <= self.message_overhead {
            return entry;
        }

        let available = budget - self.message_overhead;
        let label = Self::label(message);
        // The label and its newline must leave room for at least one token of text.
        let label_cost = self.budgeter.estimate(&format!("{label}\n"));
        if label_cost < available {
            let text = self.budgeter.truncate(&message.text, available - label_cost);
            entry.label = label;
            entry.text = text;
        } else {
            entry.text = self.budgeter.truncate(&message.text, available);
        }

        let rendered = entry.render();
        entry.tokens = self.budgeter.estimate(&rendered) + self.message_overhead;
        // Concatenating label and text can round up past the split; shave
        // the text until the whole entry fits.
        while entry.tokens > budget && !entry.text.is_empty() {
            let text_budget = self.budgeter.estimate(&entry.text).saturating_sub(1);
            let shorter = self.budgeter.truncate(&entry.text, text_budget);
            if shorter.len() == entry.text.len() {
                entry.text.clear();
            } else {
                entry.text = shorter;
            }
            entry.tokens = self.budgeter.estimate(&entry.render()) + self.message_overhead;
        }
        if entry.tokens > budget {
            entry.label.clear();
            entry.tokens = self.budgeter.estimate(&entry.render()) + self.message_overhead;
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{TruncationPolicy, WordCountEstimator};
    use chrono::Utc;

    fn message(sequence: u64, author: AgentRole, text: &str) -> Message {
        Message {
            sequence,
            author,
            speaker_name: author.display_name().to_string(),
            stage: if sequence <= 2 { Stage::Opening } else { Stage::Rebuttal },
            round: 0,
            text: text.to_string(),
            token_count: 0,
            timestamp: Utc::now(),
        }
    }

    fn history(n: u64, words: usize) -> Vec<Message> {
        (1..=n)
            .map(|i| {
                let role = if i % 2 == 0 {
                    AgentRole::ReligionExpert
                } else {
                    AgentRole::IndianHistorian
                };
                message(i, role, &format!("statement{i} ").repeat(words))
            })
            .collect()
    }

    fn builder() -> ContextWindowBuilder {
        ContextWindowBuilder::new(TokenBudgeter::default(), 4)
    }

    #[test]
    fn test_empty_history() {
        let window = builder().build(&[], 100);
        assert!(window.is_empty());
        assert_eq!(window.total_tokens(), 0);
        assert_eq!(window.render_or(prompts::NO_PRIOR_STATEMENTS), "No prior statements.");
    }

    #[test]
    fn test_everything_fits() {
        let msgs = history(3, 2);
        let window = builder().build(&msgs, 10_000);
        assert_eq!(window.len(), 3);
        assert_eq!(window.omitted(), 0);
        let seqs: Vec<u64> = window.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(window.render().starts_with("Indian Historian (opening, #1):\n"));
    }

    #[test]
    fn test_keeps_most_recent_suffix() {
        let msgs = history(6, 10);
        let b = builder();
        let per_entry = b.entry(&msgs[5]).tokens;
        let window = b.build(&msgs, per_entry * 2 + 1);
        let seqs: Vec<u64> = window.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![5, 6]);
        assert_eq!(window.omitted(), 4);
        assert!(window.truncation().is_none());
    }

    #[test]
    fn test_oversized_newest_is_truncated() {
        let mut msgs = history(2, 2);
        msgs.push(message(3, AgentRole::AnthropologyExpert, &"x".repeat(2000)));
        let window = builder().build(&msgs, 50);
        assert_eq!(window.len(), 1);
        let entry = &window.entries()[0];
        assert_eq!(entry.sequence, 3);
        assert!(entry.truncated);
        assert!(!entry.text.is_empty());
        assert!(entry.label.starts_with("Anthropology Expert"));
        assert!(window.total_tokens() <= 50);

        let t = window.truncation().unwrap();
        assert_eq!(t.sequence, 3);
        assert!(t.original_tokens > 50);
        assert_eq!(t.kept_tokens, window.total_tokens());
    }

    #[test]
    fn test_tiny_budget_drops_label() {
        let msgs = vec![message(1, AgentRole::IndianHistorian, &"y".repeat(400))];
        let window = builder().build(&msgs, 6);
        let entry = &window.entries()[0];
        assert!(entry.label.is_empty());
        assert!(!entry.text.is_empty());
        assert!(window.total_tokens() <= 6);
    }

    #[test]
    fn test_budget_below_overhead_yields_empty_entry() {
        let msgs = vec![message(1, AgentRole::IndianHistorian, "some text here")];
        let window = builder().build(&msgs, 3);
        assert_eq!(window.len(), 1);
        assert_eq!(window.entries()[0].render(), "");
        assert_eq!(window.total_tokens(), 0);
    }

    #[test]
    fn test_keep_earliest_policy_keeps_prefix() {
        let b = ContextWindowBuilder::new(TokenBudgeter::with_policy(TruncationPolicy::KeepEarliest), 4);
        let text = format!("BEGIN {}", "z".repeat(1000));
        let msgs = vec![message(1, AgentRole::IndianHistorian, &text)];
        let window = b.build(&msgs, 40);
        assert!(window.entries()[0].text.starts_with("BEGIN"));
    }

    #[test]
    fn test_render_fits_budget_across_sizes() {
        let b = builder();
        let msgs = history(8, 7);
        for budget in [0, 1, 5, 10, 25, 40, 80, 150, 300, 1000] {
            let window = b.build(&msgs, budget);
            assert!(window.total_tokens() <= budget, "budget {budget}");
            assert!(
                TokenBudgeter::default().estimate(&window.render()) <= budget,
                "render over budget {budget}"
            );
        }
    }

    #[test]
    fn test_word_estimator_window() {
        let b = ContextWindowBuilder::new(
            TokenBudgeter::new(WordCountEstimator::default(), TruncationPolicy::KeepLatest),
            2,
        );
        let msgs = history(5, 20);
        let window = b.build(&msgs, 70);
        assert!(window.total_tokens() <= 70);
        assert_eq!(window.entries().last().unwrap().sequence, 5);
    }
}
