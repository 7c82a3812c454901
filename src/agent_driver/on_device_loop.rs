//! On-device simple-agent loop: constrained tool set, skill-aware prompt
//! inlining, `None` on any failure (§4.9.2).
//!
//! Grounded in the teacher's on-device/remote distinction in
//! `ollama.rs`/`openai.rs` and the Skill Prompt Optimiser contract in §4.4.

use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::ledger::TokenLedger;
use crate::model_client::{Message, ModelClient, ModelRequest};
use crate::skills::Skill;
use crate::model_client::small_model::SmallModelClient;
use crate::tools::ToolRegistry;

/// The fixed constrained tool set for the on-device loop (§4.9.2).
pub const ALLOWED_TOOLS: [&str; 3] = ["bash", "write_file", "read_file"];

const MAX_ON_DEVICE_ITERATIONS: usize = 6;

/// Returns `Ok(None)` on any model error or tool error, per the on-device
/// contract — the orchestrator re-executes at `fast_cloud` on `Ok(None)`.
/// Returns `Err(CoreError::Cancelled)` when the cancellation signal fires;
/// unlike an ordinary failure this must not fall through to `fast_cloud`
/// (§5), so it is surfaced distinctly from the `Ok(None)` case.
pub async fn run_on_device_loop(
    on_device: &ModelClient,
    user_prompt: &str,
    skill: Option<&Skill>,
    tool_registry: &ToolRegistry,
    small_model: &SmallModelClient,
    ledger: &mut TokenLedger,
    cancel: &CancellationToken,
) -> Result<Option<String>, CoreError> {
    let mut system_prompt = "You are a constrained on-device assistant. Use only bash, write_file, or read_file."
        .to_string();

    if let Some(skill) = skill {
        let condensed = small_model.optimise_skill_prompt(user_prompt, skill, ledger).await;
        system_prompt.push_str("\n\nSkill instructions:\n");
        system_prompt.push_str(&condensed);
    }

    let mut messages = vec![Message::user(user_prompt)];
    let allowed: Vec<String> = ALLOWED_TOOLS.iter().map(|s| s.to_string()).collect();
    let tool_schemas = tool_registry.tool_schema_json(Some(&allowed));

    for _ in 0..MAX_ON_DEVICE_ITERATIONS {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let request = ModelRequest {
            model_id: on_device.model_id().to_string(),
            system_prompt: system_prompt.clone(),
            messages: messages.clone(),
            tool_schemas: tool_schemas.clone(),
            max_tokens: 512,
            temperature: 0.0,
        };

        let response = tokio::select! {
            result = on_device.generate(&request) => match result {
                Ok(response) => response,
                Err(_) => return Ok(None),
            },
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
        };

        ledger.record(
            on_device.variant().ledger_provider(),
            "on_device_agent",
            response.usage.input,
            response.usage.output,
            on_device.model_id(),
            0,
        );

        if response.tool_uses.is_empty() {
            return Ok(response.text);
        }

        for tool_use in &response.tool_uses {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            if !ALLOWED_TOOLS.contains(&tool_use.name.as_str()) {
                return Ok(None);
            }
            match tool_registry.execute(&tool_use.name, &tool_use.input) {
                Ok(result) if !result.is_error => {
                    messages.push(Message::assistant(format!("[called {}]", tool_use.name)));
                    messages.push(Message::tool_result(tool_use.id.clone(), result.content));
                }
                _ => return Ok(None),
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::ALLOWED_TOOLS;

    #[test]
    fn allowed_tools_match_spec_constrained_set() {
        assert_eq!(ALLOWED_TOOLS, ["bash", "write_file", "read_file"]);
    }
}
