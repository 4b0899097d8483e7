//! Debate topics.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

/// The subject of a debate. Immutable once a session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateTopic {
    /// Slug used in session ids and file names.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub constraints: Option<String>,
}

impl DebateTopic {
    /// Topic with an id derived from the title.
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: slugify(&title),
            title,
            description: String::new(),
            constraints: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = slugify(&id.into());
        self.id = id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        let constraints = constraints.into();
        self.constraints = (!constraints.trim().is_empty()).then_some(constraints);
        self
    }

    /// Reject a blank title.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.title.trim().is_empty() {
            return Err(ConfigurationError::EmptyTopic);
        }
        Ok(())
    }

    /// Topic block placed at the top of every stage instruction.
    pub fn as_user_prompt(&self) -> String {
        let mut out = format!("Debate topic: {}\n", self.title.trim());
        if !self.description.trim().is_empty() {
            out.push_str(&format!("\nDescription:\n{}\n", self.description.trim()));
        }
        if let Some(constraints) = &self.constraints {
            out.push_str(&format!("\nConstraints / scope:\n{}\n", constraints.trim()));
        }
        out
    }
}

/// Lowercase ASCII slug: alphanumerics kept, runs of anything else
/// collapsed to one `-`. Falls back to `debate` when nothing survives.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug: String = slug.chars().take(48).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "debate".to_string()
    } else {
        slug.to_string()
    }
}
