//! Token budgeting: pluggable estimators and budget-bounded truncation.
//!
//! Every size decision in the engine (context windows, transcript
//! compression, message token counts) goes through a [`TokenBudgeter`], so
//! the estimator and the truncation direction are chosen once per session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Trait for estimating token counts from text.
///
/// Implementations must be deterministic, return 0 for empty text, and be
/// monotonic over prefixes and suffixes: growing a prefix (or suffix) of a
/// text never lowers its estimate.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text.
    fn estimate(&self, text: &str) -> u32;

    /// Estimator name for logging.
    fn name(&self) -> &str;
}

/// Simple word-count based estimator (words × factor).
///
/// Uses the approximation that ~1.3 tokens per word for English text.
#[derive(Debug, Clone)]
pub struct WordCountEstimator {
    /// Tokens per word multiplier.
    pub factor: f64,
}

impl Default for WordCountEstimator {
    fn default() -> Self {
        Self { factor: 1.3 }
    }
}

impl TokenEstimator for WordCountEstimator {
    fn estimate(&self, text: &str) -> u32 {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.factor).ceil() as u32
    }

    fn name(&self) -> &str {
        "word_count"
    }
}

/// Character-count based estimator (bytes / divisor).
///
/// Uses the approximation that ~4 characters per token for English text.
#[derive(Debug, Clone)]
pub struct CharCountEstimator {
    /// Characters per token.
    pub chars_per_token: f64,
}

impl Default for CharCountEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
        }
    }
}

impl TokenEstimator for CharCountEstimator {
    fn estimate(&self, text: &str) -> u32 {
        (text.len() as f64 / self.chars_per_token).ceil() as u32
    }

    fn name(&self) -> &str {
        "char_count"
    }
}

/// Which end of an over-budget text survives truncation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Keep the tail of the text (suffix-preserving).
    #[default]
    KeepLatest,
    /// Keep the head of the text (prefix-preserving).
    KeepEarliest,
}

impl std::fmt::Display for TruncationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepLatest => write!(f, "keep_latest"),
            Self::KeepEarliest => write!(f, "keep_earliest"),
        }
    }
}

/// Estimates, checks and truncates text against token budgets.
///
/// Side-effect free: every method is a pure function of its inputs.
#[derive(Clone)]
pub struct TokenBudgeter {
    estimator: Arc<dyn TokenEstimator>,
    policy: TruncationPolicy,
}

impl TokenBudgeter {
    /// Create a budgeter with a specific estimator and truncation policy.
    pub fn new(estimator: impl TokenEstimator + 'static, policy: TruncationPolicy) -> Self {
        Self {
            estimator: Arc::new(estimator),
            policy,
        }
    }

    /// Character-based budgeter with the given policy.
    pub fn with_policy(policy: TruncationPolicy) -> Self {
        Self::new(CharCountEstimator::default(), policy)
    }

    /// Same estimator, different truncation policy.
    pub fn with_truncation(&self, policy: TruncationPolicy) -> Self {
        Self {
            estimator: Arc::clone(&self.estimator),
            policy,
        }
    }

    /// Estimated token count of `text` (0 for empty text).
    pub fn estimate(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        self.estimator.estimate(text)
    }

    /// Whether `text` fits within `budget` tokens.
    pub fn fits(&self, text: &str, budget: u32) -> bool {
        self.estimate(text) <= budget
    }

    /// Truncate `text` so that its estimate is at most `budget`, using the
    /// configured policy. Text that already fits is returned unchanged.
    pub fn truncate(&self, text: &str, budget: u32) -> String {
        self.truncate_with(text, budget, self.policy)
    }

    /// Truncate with an explicit policy.
    pub fn truncate_with(&self, text: &str, budget: u32, policy: TruncationPolicy) -> String {
        if self.fits(text, budget) {
            return text.to_string();
        }

        // Char boundaries, including both ends, so slices stay valid UTF-8.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        match policy {
            TruncationPolicy::KeepEarliest => {
                // Largest prefix that fits; the empty prefix always does.
                let (mut lo, mut hi) = (0usize, bounds.len() - 1);
                while lo < hi {
                    let mid = (lo + hi + 1) / 2;
                    if self.fits(&text[..bounds[mid]], budget) {
                        lo = mid;
                    } else {
                        hi = mid - 1;
                    }
                }
                text[..bounds[lo]].to_string()
            }
            TruncationPolicy::KeepLatest => {
                // Largest suffix that fits; the empty suffix always does.
                let (mut lo, mut hi) = (0usize, bounds.len() - 1);
                while lo < hi {
                    let mid = (lo + hi) / 2;
                    if self.fits(&text[bounds[mid]..], budget) {
                        hi = mid;
                    } else {
                        lo = mid + 1;
                    }
                }
                text[bounds[lo]..].to_string()
            }
        }
    }

    /// The configured truncation policy.
    pub fn policy(&self) -> TruncationPolicy {
        self.policy
    }

    /// Name of the underlying estimator.
    pub fn estimator_name(&self) -> &str {
        self.estimator.name()
    }
}

impl Default for TokenBudgeter {
    fn default() -> Self {
        Self::with_policy(TruncationPolicy::default())
    }
}

impl std::fmt::Debug for TokenBudgeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBudgeter")
            .field("estimator", &self.estimator.name())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_estimator() {
        let est = WordCountEstimator::default();
        assert_eq!(est.estimate("hello world"), 3); // 2 * 1.3 = 2.6 → 3
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.name(), "word_count");
    }

    #[test]
    fn test_char_count_estimator() {
        let est = CharCountEstimator::default();
        assert_eq!(est.estimate("hello world"), 3); // 11 / 4 = 2.75 → 3
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.name(), "char_count");
    }

    #[test]
    fn test_custom_estimator_factor() {
        let est = WordCountEstimator { factor: 1.0 };
        assert_eq!(est.estimate("one two three"), 3);

        let est2 = WordCountEstimator { factor: 2.0 };
        assert_eq!(est2.estimate("one two three"), 6);
    }

    #[test]
    fn test_empty_text_is_zero_and_fits_zero_budget() {
        let budgeter = TokenBudgeter::default();
        assert_eq!(budgeter.estimate(""), 0);
        assert!(budgeter.fits("", 0));
        assert_eq!(budgeter.truncate("", 0), "");
    }

    #[test]
    fn test_fits() {
        let budgeter = TokenBudgeter::default();
        assert!(budgeter.fits("abcdefgh", 2));
        assert!(!budgeter.fits("abcdefghi", 2));
    }

    #[test]
    fn test_truncate_unchanged_when_fits() {
        let budgeter = TokenBudgeter::default();
        assert_eq!(budgeter.truncate("short", 10), "short");
    }

    #[test]
    fn test_truncate_keep_latest_preserves_suffix() {
        let budgeter = TokenBudgeter::with_policy(TruncationPolicy::KeepLatest);
        let text = "0123456789abcdefghij"; // 20 bytes → 5 tokens
        let out = budgeter.truncate(text, 2);
        assert_eq!(out, "cdefghij");
        assert!(text.ends_with(&out));
        assert!(budgeter.estimate(&out) <= 2);
    }

    #[test]
    fn test_truncate_keep_earliest_preserves_prefix() {
        let budgeter = TokenBudgeter::with_policy(TruncationPolicy::KeepEarliest);
        let text = "0123456789abcdefghij";
        let out = budgeter.truncate(text, 2);
        assert_eq!(out, "01234567");
        assert!(text.starts_with(&out));
    }

    #[test]
    fn test_truncate_zero_budget_yields_empty() {
        let budgeter = TokenBudgeter::default();
        assert_eq!(budgeter.truncate("something long enough", 0), "");
        assert_eq!(
            budgeter.truncate_with("something", 0, TruncationPolicy::KeepEarliest),
            ""
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let budgeter = TokenBudgeter::with_policy(TruncationPolicy::KeepEarliest);
        // Each 'é' is two bytes; a cut must never split one.
        let text = "éééééééééé";
        let out = budgeter.truncate(text, 1);
        assert!(out.chars().all(|c| c == 'é'));
        assert!(budgeter.estimate(&out) <= 1);
        assert_eq!(out, "éé");
    }

    #[test]
    fn test_truncate_with_word_estimator() {
        let budgeter =
            TokenBudgeter::new(WordCountEstimator { factor: 1.0 }, TruncationPolicy::KeepLatest);
        let out = budgeter.truncate("one two three four five", 2);
        assert!(budgeter.estimate(&out) <= 2);
        assert!(out.ends_with("five"));
        assert!(out.contains("four"));
    }

    #[test]
    fn test_estimate_monotonic_in_length() {
        let budgeter = TokenBudgeter::default();
        let text = "The Harappan script remains undeciphered after a century of study.";
        let mut last = 0;
        for end in 0..=text.len() {
            let est = budgeter.estimate(&text[..end]);
            assert!(est >= last);
            last = est;
        }
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&TruncationPolicy::KeepEarliest).unwrap();
        assert_eq!(json, "\"keep_earliest\"");
        let parsed: TruncationPolicy = serde_json::from_str("\"keep_latest\"").unwrap();
        assert_eq!(parsed, TruncationPolicy::KeepLatest);
        assert_eq!(TruncationPolicy::default().to_string(), "keep_latest");
    }

    #[test]
    fn test_debug_names_estimator() {
        let budgeter = TokenBudgeter::default();
        let dbg = format!("{:?}", budgeter);
        assert!(dbg.contains("char_count"));
        assert_eq!(budgeter.estimator_name(), "char_count");
    }
}
