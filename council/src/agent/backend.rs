//! Generation backend seam.
//!
//! The engine never talks to a model server directly; it hands a
//! [`GenerationRequest`] to a [`GenerationBackend`] and consumes the
//! returned chunk stream.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

/// Lazy, finite stream of text chunks. An `Err` item ends the call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Sampling and length options for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: None,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }
}

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_content: String,
    pub options: GenerationOptions,
}

/// Text-generation backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Start a streaming generation. Errors before the first chunk are
    /// returned directly; errors afterwards arrive as stream items.
    async fn generate(&self, request: GenerationRequest) -> Result<ChunkStream, BackendError>;
}
