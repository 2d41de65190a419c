//! LLM collaborator: a thin client for OpenAI-compatible chat completion
//! endpoints (NVIDIA NIM, vLLM, llama.cpp server, Ollama's `/v1`).
//!
//! - `POST {endpoint}/chat/completions` with `stream=false` returns one JSON body
//! - with `stream=true` the reply is server-sent events; deltas are
//!   accumulated and the full text is returned

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use opsrag_core::config::LlmSettings;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}: {snippet}")]
    HttpStatus { status: StatusCode, url: String, snippet: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("no reply after {0:?}")]
    Timeout(Duration),

    #[error("model returned an empty reply")]
    Empty,

    #[error("API key variable {0} is not set")]
    MissingApiKey(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Sampling parameters for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&LlmSettings::default())
    }
}

impl From<&LlmSettings> for GenerationParams {
    fn from(s: &LlmSettings) -> Self {
        Self { temperature: s.temperature, top_p: s.top_p, max_tokens: s.max_tokens, stream: s.stream }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError>;
}

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiCompatClient {
    pub fn new(endpoint: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, LlmError> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(LlmError::InvalidEndpoint(endpoint.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        Ok(Self { client, url, model: model.to_string(), api_key, timeout })
    }

    /// Builds a client from settings, reading the key from `api_key_env`.
    /// A missing key is an error so callers can drop to retrieval-only mode.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        let key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingApiKey(settings.api_key_env.clone()))?;
        Self::new(&settings.endpoint, &settings.model, Some(key), Duration::from_secs(settings.timeout_secs))
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, LlmError> {
        debug!("POST {}", self.url);
        let mut req = self.client.post(&self.url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| self.map_transport(e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let snippet = text.chars().take(240).collect::<String>();
            return Err(LlmError::HttpStatus { status, url: self.url.clone(), snippet });
        }
        Ok(resp)
    }

    fn map_transport(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::Transport(e)
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, stream = params.stream))]
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let body = ChatRequest::new(&self.model, prompt, params);
        let resp = self.send(&body).await?;

        let text = if params.stream {
            let mut acc = SseAccumulator::default();
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| self.map_transport(e))?;
                if acc.push(&String::from_utf8_lossy(&chunk))? {
                    break;
                }
            }
            acc.finish()?
        } else {
            let out: ChatResponse = resp.json().await.map_err(|e| LlmError::Decode(e.to_string()))?;
            out.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default()
        };

        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, prompt: &'a str, params: &GenerationParams) -> Self {
        Self {
            model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            stream: params.stream,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Line-buffered SSE decoder. Network chunks may split a line anywhere.
#[derive(Debug, Default)]
pub(crate) struct SseAccumulator {
    buffer: String,
    text: String,
    done: bool,
}

impl SseAccumulator {
    /// Feeds raw bytes; returns true once `[DONE]` was seen.
    pub(crate) fn push(&mut self, chunk: &str) -> Result<bool, LlmError> {
        self.buffer.push_str(chunk);
        while let Some(end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=end).collect();
            self.line(line.trim())?;
            if self.done {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn line(&mut self, line: &str) -> Result<(), LlmError> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }
        let chunk: StreamChunk =
            serde_json::from_str(data).map_err(|e| LlmError::Decode(format!("bad stream event: {e}")))?;
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text.push_str(&content);
            }
        }
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<String, LlmError> {
        if !self.done {
            let rest = std::mem::take(&mut self.buffer);
            self.line(rest.trim())?;
        }
        Ok(self.text)
    }
}
