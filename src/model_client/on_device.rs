//! On-device small-model client: probes a local HTTP runner (the
//! `ollama`-style server on localhost) before ever issuing a request.
//!
//! Grounded in the teacher's `src/ollama.rs` (`OllamaClient::chat_json`,
//! `get_ps`, `/api/show` liveness probe), adapted to the abstract
//! `ModelRequest`/`ModelResponse` contract.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use super::{Message, ModelRequest, ModelResponse, StopReason, TokenUsage};
use crate::error::{CoreError, ToolErrorKind};

const DEFAULT_PORT: u16 = 11434;
const PROBE_TIMEOUT_SECS: u64 = 2;

static AVAILABILITY: OnceLock<bool> = OnceLock::new();

#[derive(Clone)]
pub struct OnDeviceClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OnDeviceClient {
    pub fn new(configured_url: Option<String>, model: impl Into<String>) -> Self {
        let base_url = configured_url.unwrap_or_else(|| format!("http://127.0.0.1:{DEFAULT_PORT}"));
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .expect("building reqwest client");
        Self { http, base_url, model: model.into() }
    }

    pub fn model_id(&self) -> &str {
        &self.model
    }

    /// Detection order, resolved per SPEC_FULL.md §4.4: configured path (the
    /// caller-supplied `base_url`) → localhost probe on the default port →
    /// unavailable. Cached for the process lifetime via `OnceLock` since the
    /// runner does not appear/disappear mid-process.
    pub async fn available(&self) -> bool {
        if let Some(cached) = AVAILABILITY.get() {
            return *cached;
        }
        let result = self.probe().await;
        *AVAILABILITY.get_or_init(|| result)
    }

    async fn probe(&self) -> bool {
        self.http
            .get(format!("{}/api/ps", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, CoreError> {
        if !self.available().await {
            return Err(CoreError::tool(ToolErrorKind::Runtime, "on_device_model", "on-device runner unavailable"));
        }

        let payload = ChatRequest {
            model: request.model_id.clone(),
            messages: render_messages(&request.system_prompt, &request.messages),
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| CoreError::tool(ToolErrorKind::Timeout, "on_device_model", e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::tool(ToolErrorKind::Runtime, "on_device_model", response.status().to_string()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::tool(ToolErrorKind::Runtime, "on_device_model", e.to_string()))?;

        Ok(ModelResponse {
            text: Some(parsed.message.content),
            tool_uses: Vec::new(),
            usage: TokenUsage {
                input: parsed.prompt_eval_count.unwrap_or(0),
                output: parsed.eval_count.unwrap_or(0),
            },
            stop_reason: StopReason::EndTurn,
        })
    }
}

fn render_messages(system_prompt: &str, messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = vec![ChatMessage { role: "system".to_string(), content: system_prompt.to_string() }];
    for message in messages {
        let role = match message.role {
            super::Role::System => "system",
            super::Role::User => "user",
            super::Role::Assistant => "assistant",
            super::Role::Tool => "tool",
        };
        out.push(ChatMessage { role: role.to_string(), content: message.content.clone() });
    }
    out
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url_uses_default_port() {
        let client = OnDeviceClient::new(None, "llama3");
        assert!(client.base_url.contains(&DEFAULT_PORT.to_string()));
    }

    #[test]
    fn configured_url_overrides_default() {
        let client = OnDeviceClient::new(Some("http://localhost:9999".to_string()), "llama3");
        assert_eq!(client.base_url, "http://localhost:9999");
    }
}
