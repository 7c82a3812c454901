//! The `ModelClient` boundary (§6): a uniform request/response contract over
//! heterogeneous providers.
//!
//! Grounded in the teacher's `openai.rs`/`ollama.rs` wire-type shapes
//! (`ChatMessage`, streaming chunk types), generalized per REDESIGN FLAGS
//! into a provider-tagged enum + one trait instead of string branching.

pub mod cloud;
pub mod on_device;
pub mod small_model;

use serde::{Deserialize, Serialize};

pub use cloud::CloudModelClient;
pub use on_device::OnDeviceClient;
pub use small_model::SmallModelClient;

use crate::error::CoreError;
use crate::ledger::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub tool_use_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_use_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_use_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_use_id: None }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into(), tool_use_id: Some(tool_use_id.into()) }
    }
}

#[derive(Debug, Clone)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model_id: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tool_schemas: serde_json::Value,
    pub max_tokens: u64,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_uses: Vec<ToolUse>,
    pub usage: TokenUsage,
    pub stop_reason: StopReason,
}

/// One of `{CloudStrong, CloudFast, OnDeviceSmall, LocalRunner}` (REDESIGN
/// FLAGS), each carrying the ledger label it records against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    CloudStrong,
    CloudFast,
    OnDeviceSmall,
    LocalRunner,
}

impl ModelVariant {
    pub fn ledger_provider(&self) -> Provider {
        match self {
            ModelVariant::CloudStrong => Provider::CloudStrong,
            ModelVariant::CloudFast => Provider::CloudFast,
            ModelVariant::OnDeviceSmall => Provider::OnDevice,
            ModelVariant::LocalRunner => Provider::LocalRunner,
        }
    }
}

/// A `ModelClient` is one of a fixed set of provider variants (REDESIGN
/// FLAGS), each wrapping the concrete client that knows how to talk to it.
/// Dispatch is by `match`, not dynamic trait dispatch — the fallback chain
/// in `agent_driver` holds a `Vec<ModelClient>` directly.
#[derive(Clone)]
pub enum ModelClient {
    CloudStrong(CloudModelClient),
    CloudFast(CloudModelClient),
    OnDeviceSmall(OnDeviceClient),
}

impl ModelClient {
    pub fn variant(&self) -> ModelVariant {
        match self {
            ModelClient::CloudStrong(_) => ModelVariant::CloudStrong,
            ModelClient::CloudFast(_) => ModelVariant::CloudFast,
            ModelClient::OnDeviceSmall(_) => ModelVariant::OnDeviceSmall,
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            ModelClient::CloudStrong(client) | ModelClient::CloudFast(client) => client.model_id(),
            ModelClient::OnDeviceSmall(client) => client.model_id(),
        }
    }

    pub async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, CoreError> {
        match self {
            ModelClient::CloudStrong(client) | ModelClient::CloudFast(client) => client.generate(request).await,
            ModelClient::OnDeviceSmall(client) => client.generate(request).await,
        }
    }
}

/// Errors worth retrying against the next model in a fallback chain —
/// grounded in the teacher's `streaming.rs::is_fallback_worthy_error`.
pub fn is_fallback_worthy_error(error: &CoreError) -> bool {
    matches!(
        error,
        CoreError::ToolError { kind: crate::error::ToolErrorKind::Timeout, .. } | CoreError::AuthError { .. }
    )
}
