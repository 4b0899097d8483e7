//! Deterministic in-process backend for tests and dry runs.

use std::sync::Mutex;

use async_trait::async_trait;

use super::backend::{ChunkStream, GenerationBackend, GenerationRequest};
use crate::errors::BackendError;

/// How a scripted call misbehaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Fail before streaming starts.
    Error(String),
    /// Never produce a chunk (hits the call timeout).
    Hang,
    /// Complete without any text.
    Empty,
    /// Emit one chunk, then a stream error.
    MidStream(String),
}

#[derive(Debug)]
struct FailureRule {
    system_contains: Option<String>,
    user_contains: Option<String>,
    remaining: u32,
    failure: ScriptedFailure,
}

impl FailureRule {
    fn matches(&self, request: &GenerationRequest) -> bool {
        self.remaining > 0
            && self
                .system_contains
                .as_deref()
                .map_or(true, |s| request.system_prompt.contains(s))
            && self
                .user_contains
                .as_deref()
                .map_or(true, |s| request.user_content.contains(s))
    }
}

type Responder = dyn Fn(&GenerationRequest, usize) -> String + Send + Sync;

/// Scripted [`GenerationBackend`].
///
/// Replies come from a responder closure (given the request and the
/// 0-based call index) and are streamed word by word. Failure rules
/// match on prompt substrings and fire a fixed number of times.
pub struct ScriptedBackend {
    responder: Box<Responder>,
    rules: Mutex<Vec<FailureRule>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    /// Backend with a canned reply naming the model and call number.
    pub fn new() -> Self {
        Self::with_responder(|request, index| {
            format!(
                "[{} #{}] The surviving evidence is partial and contested. \
                 Where sources agree, the case is strong; elsewhere it rests on inference.\n\n\
                 Key points from my perspective:\n- Evidence is uneven\n- Uncertainty remains",
                request.model,
                index + 1
            )
        })
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&GenerationRequest, usize) -> String + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` calls whose system prompt contains
    /// `system_contains` and whose user content contains `user_contains`
    /// (`None` matches anything).
    pub fn fail_matching(
        self,
        system_contains: Option<&str>,
        user_contains: Option<&str>,
        times: u32,
        failure: ScriptedFailure,
    ) -> Self {
        lock(&self.rules).push(FailureRule {
            system_contains: system_contains.map(String::from),
            user_contains: user_contains.map(String::from),
            remaining: times,
            failure,
        });
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    fn take_failure(&self, request: &GenerationRequest) -> Option<ScriptedFailure> {
        let mut rules = lock(&self.rules);
        let rule = rules.iter_mut().find(|r| r.matches(request))?;
        rule.remaining -= 1;
        Some(rule.failure.clone())
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Split text into word-sized chunks that concatenate back to it.
fn word_chunks(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(String::from).collect()
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ChunkStream, BackendError> {
        let index = {
            let mut calls = lock(&self.calls);
            calls.push(request.clone());
            calls.len() - 1
        };

        match self.take_failure(&request) {
            Some(ScriptedFailure::Error(msg)) => Err(BackendError::RequestFailed(msg)),
            Some(ScriptedFailure::Hang) => {
                Ok(Box::pin(futures::stream::pending::<Result<String, BackendError>>()))
            }
            Some(ScriptedFailure::Empty) => {
                Ok(Box::pin(futures::stream::empty::<Result<String, BackendError>>()))
            }
            Some(ScriptedFailure::MidStream(msg)) => Ok(Box::pin(futures::stream::iter(vec![
                Ok("partial ".to_string()),
                Err(BackendError::Stream(msg)),
            ]))),
            None => {
                let reply = (self.responder)(&request, index);
                let chunks = word_chunks(&reply).into_iter().map(Ok::<String, BackendError>);
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
        }
    }
}
