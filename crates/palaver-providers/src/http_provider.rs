//! Streaming HTTP backend for OpenAI-compatible `/chat/completions` APIs.
//!
//! Works with OpenAI, OpenRouter, DeepSeek, Groq, vLLM, Ollama's OpenAI
//! endpoint, and anything else that speaks the same protocol with
//! `stream: true`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use palaver_core::config::BackendConfig;
use palaver_core::types::UserId;

use crate::streaming::SseStreamParser;
use crate::traits::{Backend, BackendConnection, BackendError, Prompt, ReplyStream};

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Text carried by one SSE payload, if any.
fn delta_text(data: &str) -> Result<Option<String>, BackendError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| BackendError::Decode(e.to_string()))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

// ─────────────────────────────────────────────
// HttpBackend
// ─────────────────────────────────────────────

#[derive(Debug)]
struct Settings {
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl Settings {
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

/// Hands out [`HttpConnection`]s sharing one pooled `reqwest::Client`.
#[derive(Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    settings: Arc<Settings>,
}

impl HttpBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(HttpBackend {
            client,
            settings: Arc::new(Settings {
                api_base: config.api_base.clone(),
                api_key: config.api_key.clone(),
                model: config.model.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            }),
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn connect(&self, user: &UserId) -> Result<Box<dyn BackendConnection>, BackendError> {
        debug!(user = %user, api_base = %self.settings.api_base, "Opening backend connection");
        Ok(Box::new(HttpConnection {
            client: self.client.clone(),
            settings: Arc::clone(&self.settings),
            user: user.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn display_name(&self) -> &str {
        &self.settings.model
    }
}

/// One user's connection. Stateless on the wire; `close` only fences it.
pub struct HttpConnection {
    client: reqwest::Client,
    settings: Arc<Settings>,
    user: UserId,
    closed: AtomicBool,
}

impl HttpConnection {
    fn build_request<'a>(&'a self, prompt: &Prompt) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = prompt.system.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(WireMessage {
                role: "system",
                content: system.to_string(),
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: prompt.render(),
        });

        ChatRequest {
            model: &self.settings.model,
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl BackendConnection for HttpConnection {
    async fn query(&self, prompt: &Prompt) -> Result<ReplyStream, BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }

        debug!(
            user = %self.user,
            model = %self.settings.model,
            history = prompt.history.len(),
            "Dispatching prompt"
        );

        let mut request = self
            .client
            .post(self.settings.completions_url())
            .json(&self.build_request(prompt));
        if !self.settings.api_key.is_empty() {
            request = request.bearer_auth(&self.settings.api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(user = %self.user, error = %e, "Backend request failed");
            BackendError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(user = %self.user, status = %status, body = %body, "Backend API error");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let fragments = SseStreamParser::new(Box::pin(response.bytes_stream())).filter_map(
            |item| async move {
                match item {
                    Ok(data) => delta_text(&data).transpose(),
                    Err(e) => Some(Err(e)),
                }
            },
        );
        Ok(Box::pin(fragments))
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BackendError::Closed);
        }
        debug!(user = %self.user, "Backend connection closed");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
