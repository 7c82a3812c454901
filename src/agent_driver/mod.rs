//! Agent Driver: wraps the model provider in a React loop (§4.9).
//!
//! Grounded in the teacher's `engine/mod.rs::run_agent_loop` (public
//! contract, iteration shape) and `engine/streaming.rs` (fallback chain,
//! progress draining).

pub mod cloud_loop;
pub mod on_device_loop;

use serde_json::Value;

use crate::model_client::ModelClient;
use crate::router::Plan;
use crate::skills::Skill;
use crate::tools::ToolRegistry;

pub use cloud_loop::run_cloud_loop;
pub use on_device_loop::run_on_device_loop;

/// `{stage, message}`, the closed progress-event schema from §6.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: &'static str,
    pub message: String,
}

/// Non-blocking sink; implementations may drop events (§4.9.1).
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: Value,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub iterations: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub truncated: bool,
}

impl RunResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            answer: None,
            error: Some(error.into()),
            iterations: 0,
            tool_calls: Vec::new(),
            truncated: false,
        }
    }
}

/// A fallback chain of model clients: primary first, then configured
/// defaults, then any remaining registered models — deduplicated, grounded
/// in `engine/streaming.rs::build_model_chain`.
pub struct ModelChain {
    clients: Vec<ModelClient>,
}

impl ModelChain {
    pub fn new(primary: ModelClient, rest: Vec<ModelClient>) -> Self {
        let mut clients = vec![primary];
        clients.extend(rest);
        Self { clients }
    }

    pub fn clients(&self) -> &[ModelClient] {
        &self.clients
    }
}

pub struct AgentDriverContext<'a> {
    pub plan: &'a Plan,
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub tool_registry: &'a ToolRegistry,
    pub progress: &'a dyn ProgressSink,
}

pub struct SkillContext<'a> {
    pub skill: Option<&'a Skill>,
}
