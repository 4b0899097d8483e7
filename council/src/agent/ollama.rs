//! Ollama `/api/chat` streaming backend.
//!
//! The response body is newline-delimited JSON; each line carries a
//! fragment in `message.content`, the last one sets `done: true`, and a
//! line with an `error` field aborts the call.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::backend::{ChunkStream, GenerationBackend, GenerationRequest};
use crate::errors::BackendError;

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One parsed NDJSON line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineEvent {
    Text(String),
    Done,
    Skip,
}

/// Parse one NDJSON line from `/api/chat`.
pub(crate) fn parse_chat_line(line: &str) -> Result<LineEvent, BackendError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| BackendError::Malformed(format!("{e}: {line}")))?;
    if let Some(error) = chunk.error {
        return Err(BackendError::Stream(error));
    }
    if chunk.done {
        return Ok(LineEvent::Done);
    }
    match chunk.message {
        Some(m) if !m.content.is_empty() => Ok(LineEvent::Text(m.content)),
        _ => Ok(LineEvent::Skip),
    }
}

/// Splits a byte stream into NDJSON lines and yields text fragments.
struct LineReader<S> {
    bytes: S,
    buffer: Vec<u8>,
    ready: VecDeque<Result<String, BackendError>>,
    finished: bool,
}

impl<S> LineReader<S> {
    fn new(bytes: S) -> Self {
        Self {
            bytes,
            buffer: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        if self.finished {
            return;
        }
        let line = String::from_utf8_lossy(raw);
        match parse_chat_line(&line) {
            Ok(LineEvent::Text(text)) => self.ready.push_back(Ok(text)),
            Ok(LineEvent::Done) => self.finished = true,
            Ok(LineEvent::Skip) => {}
            Err(e) => {
                self.ready.push_back(Err(e));
                self.finished = true;
            }
        }
    }

    /// Move every complete line out of the buffer.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn flush(&mut self) {
        let rest = std::mem::take(&mut self.buffer);
        self.push_line(&rest);
        self.finished = true;
    }
}

/// Turn a byte stream into a chunk stream.
fn chunk_stream<S, B>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = futures::stream::unfold(LineReader::new(bytes), |mut reader| async move {
        loop {
            if let Some(item) = reader.ready.pop_front() {
                return Some((item, reader));
            }
            if reader.finished {
                return None;
            }
            match reader.bytes.next().await {
                Some(Ok(bytes)) => {
                    reader.buffer.extend_from_slice(bytes.as_ref());
                    reader.drain_lines();
                }
                Some(Err(e)) => {
                    reader.ready.push_back(Err(BackendError::Stream(e.to_string())));
                    reader.finished = true;
                }
                None => reader.flush(),
            }
        }
    });
    Box::pin(stream)
}

/// Streams completions from an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    host: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(host: &str) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host)
    }

    /// Build the `/api/chat` request body.
    pub(crate) fn payload(request: &GenerationRequest) -> serde_json::Value {
        let mut options = json!({ "num_predict": request.options.max_tokens });
        if let Some(t) = request.options.temperature {
            options["temperature"] = json!(t);
        }
        if let Some(p) = request.options.top_p {
            options["top_p"] = json!(p);
        }
        if !request.options.stop_sequences.is_empty() {
            options["stop"] = json!(request.options.stop_sequences);
        }
        json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_content },
            ],
            "stream": true,
            "options": options,
        })
    }

    /// Whether the server answers `/api/tags`.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(url = %url, error = %e, "Ollama health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ChunkStream, BackendError> {
        let url = self.chat_url();
        debug!(url = %url, model = %request.model, "Starting Ollama chat stream");

        let response = self
            .client
            .post(&url)
            .json(&Self::payload(&request))
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(chunk_stream(Box::pin(response.bytes_stream())))
    }
}
