//! HTTP client for cloud fast/strong model tiers.
//!
//! Grounded directly in the teacher's `src/openai.rs` (`OpenAiClient`,
//! `OaiMessage`/`OaiRequest`/`OaiChatResponse` wire shapes, SSE streaming via
//! `data: ` lines), adapted to the abstract `ModelRequest`/`ModelResponse`
//! contract instead of a bespoke call signature per feature.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Message, ModelRequest, ModelResponse, Role, StopReason, TokenUsage, ToolUse};
use crate::error::{CoreError, ToolErrorKind};

const REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Clone)]
pub struct CloudModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl CloudModelClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("building reqwest client");
        Self { http, base_url: base_url.into(), api_key, model: model.into() }
    }

    pub fn model_id(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, CoreError> {
        let payload = ChatRequest {
            model: request.model_id.clone(),
            messages: render_messages(&request.system_prompt, &request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: if request.tool_schemas.is_null() { None } else { Some(request.tool_schemas.clone()) },
        };

        let mut builder = self.http.post(format!("{}/chat/completions", self.base_url)).json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| timeout_or_runtime(&e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(CoreError::AuthError { provider: "cloud".to_string(), message: response.status().to_string() });
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::tool(ToolErrorKind::Runtime, "model_call", format!("status {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::tool(ToolErrorKind::Runtime, "model_call", e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::internal("model returned no choices"))?;

        let tool_uses = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolUse {
                id: call.id,
                name: call.function.name,
                input: serde_json::from_str(&call.function.arguments).unwrap_or(serde_json::Value::Null),
            })
            .collect::<Vec<_>>();

        let stop_reason = if !tool_uses.is_empty() {
            StopReason::ToolUse
        } else {
            match choice.finish_reason.as_deref() {
                Some("length") => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            }
        };

        Ok(ModelResponse {
            text: choice.message.content,
            tool_uses,
            usage: TokenUsage {
                input: parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                output: parsed.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
            },
            stop_reason,
        })
    }
}

fn timeout_or_runtime(e: &reqwest::Error) -> CoreError {
    if e.is_timeout() {
        CoreError::tool(ToolErrorKind::Timeout, "model_call", e.to_string())
    } else {
        CoreError::tool(ToolErrorKind::Runtime, "model_call", e.to_string())
    }
}

fn render_messages(system_prompt: &str, messages: &[Message]) -> Vec<OaiMessage> {
    let mut out = vec![OaiMessage { role: "system".to_string(), content: Some(system_prompt.to_string()), tool_call_id: None }];
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        out.push(OaiMessage {
            role: role.to_string(),
            content: Some(message.content.clone()),
            tool_call_id: message.tool_use_id.clone(),
        });
    }
    out
}

#[derive(Debug, Serialize)]
struct OaiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u64,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallWire>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallWire {
    id: String,
    function: FunctionCallWire,
}

#[derive(Debug, Deserialize)]
struct FunctionCallWire {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_messages_prefixes_system_prompt() {
        let messages = vec![Message::user("hi")];
        let rendered = render_messages("be helpful", &messages);
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].role, "system");
        assert_eq!(rendered[0].content.as_deref(), Some("be helpful"));
    }
}
