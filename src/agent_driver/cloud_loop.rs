//! Cloud loop: six-step iteration over the model fallback chain (§4.9.1).
//!
//! Grounded in `engine/mod.rs::run_agent_loop`'s iteration shape and
//! `engine/streaming.rs::stream_with_fallback`'s retry-on-fallback-worthy-
//! error behavior.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{ModelChain, ProgressEvent, ProgressSink, RunResult, ToolCallRecord};
use crate::context::{self, Importance, Turn};
use crate::error::CoreError;
use crate::ledger::TokenLedger;
use crate::model_client::{is_fallback_worthy_error, Message, ModelRequest, Role, StopReason};
use crate::model_client::small_model::SmallModelClient;
use crate::router::Plan;
use crate::stale_loop::{StaleLoopGuard, Thresholds};
use crate::tools::ToolRegistry;

const ITERATION_SUMMARY_EVERY: usize = 3;

pub struct CloudLoopArgs<'a> {
    pub plan: &'a Plan,
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub model_chain: &'a ModelChain,
    pub tool_registry: &'a ToolRegistry,
    pub small_model: &'a SmallModelClient,
    pub progress: &'a dyn ProgressSink,
    pub ledger: &'a mut TokenLedger,
    pub cancel: &'a CancellationToken,
}

fn cancelled(iteration: usize, tool_calls: Vec<ToolCallRecord>) -> RunResult {
    RunResult {
        success: false,
        answer: None,
        error: Some(CoreError::Cancelled.to_string()),
        iterations: iteration,
        tool_calls,
        truncated: false,
    }
}

pub async fn run_cloud_loop(args: CloudLoopArgs<'_>) -> RunResult {
    let CloudLoopArgs { plan, system_prompt, user_prompt, model_chain, tool_registry, small_model, progress, ledger, cancel } = args;

    let mut turns = vec![
        Turn::new(Role::System, system_prompt, Importance::Critical),
        Turn::new(Role::User, user_prompt, Importance::Critical),
    ];
    let mut guard = StaleLoopGuard::new(Thresholds::default());
    let mut tool_calls = Vec::new();
    let mut iteration = 0usize;

    let allowed_tools: Vec<String> = plan.tool_set.iter().cloned().collect();
    let tool_schemas = tool_registry.tool_schema_json(Some(&allowed_tools));

    progress.emit(ProgressEvent { stage: "agent_start", message: "starting cloud agent loop".to_string() });

    loop {
        iteration += 1;

        if cancel.is_cancelled() {
            return cancelled(iteration, tool_calls);
        }

        // Step 1: compaction check.
        if context::should_compact(&turns, None) {
            context::compact(&mut turns, None, None, small_model, ledger).await;
        }

        // Step 2: call the model, retrying across the fallback chain. A
        // cancellation mid-call aborts the in-flight request (the losing
        // branch's future is dropped by `select!`).
        let response = tokio::select! {
            result = call_with_fallback(model_chain, plan, &turns, ledger, progress, &tool_schemas) => {
                match result {
                    Ok(response) => response,
                    Err(message) => {
                        return RunResult {
                            success: false,
                            answer: None,
                            error: Some(message),
                            iterations: iteration,
                            tool_calls,
                            truncated: false,
                        };
                    }
                }
            }
            _ = cancel.cancelled() => return cancelled(iteration, tool_calls),
        };

        // Step 3: final answer?
        if response.stop_reason == StopReason::EndTurn || response.tool_uses.is_empty() {
            progress.emit(ProgressEvent { stage: "agent_complete", message: "final answer produced".to_string() });
            return RunResult {
                success: true,
                answer: response.text,
                error: None,
                iterations: iteration,
                tool_calls,
                truncated: false,
            };
        }

        if cancel.is_cancelled() {
            // Skip every pending tool call from this turn.
            return cancelled(iteration, tool_calls);
        }

        // Step 4: dispatch each tool call sequentially.
        for tool_use in &response.tool_uses {
            if cancel.is_cancelled() {
                return cancelled(iteration, tool_calls);
            }

            progress.emit(ProgressEvent { stage: "tool", message: format!("calling {}", tool_use.name) });
            let canonical = tool_registry.canonical_tool_name(&tool_use.name);
            let result = tool_registry.execute(&canonical, &tool_use.input);
            let (content, is_error) = match &result {
                Ok(ok) => (ok.content.clone(), ok.is_error),
                Err(e) => (e.to_string(), true),
            };

            tool_calls.push(ToolCallRecord { tool: canonical.clone(), input: tool_use.input.clone(), is_error });

            if let Err(stalled) = guard.record(&canonical, &tool_use.input, is_error) {
                return RunResult {
                    success: false,
                    answer: None,
                    error: Some(stalled.to_string()),
                    iterations: iteration,
                    tool_calls,
                    truncated: false,
                };
            }

            let final_content = match small_model.summarise_tool_result(&canonical, &content, ledger).await {
                Some(summary) => summary,
                None => content,
            };

            turns.push(Turn::new(
                Role::Assistant,
                format!("[tool_call {}]", tool_use.name),
                Importance::Normal,
            ));
            turns.push(Turn::new(Role::Tool, final_content, Importance::High));
        }

        // Step 5: periodic iteration summary.
        if iteration % ITERATION_SUMMARY_EVERY == 0 {
            progress.emit(ProgressEvent { stage: "iteration_summary", message: format!("iteration {iteration}") });
        } else {
            progress.emit(ProgressEvent { stage: "iteration", message: format!("iteration {iteration}") });
        }

        // Step 6: budget check.
        if iteration >= plan.max_iterations.max(1) {
            let partial = turns.iter().rev().find(|t| t.role == Role::Assistant).map(|t| t.content.clone());
            return RunResult {
                success: true,
                answer: partial,
                error: None,
                iterations: iteration,
                tool_calls,
                truncated: true,
            };
        }
    }
}

async fn call_with_fallback(
    chain: &ModelChain,
    plan: &Plan,
    turns: &[Turn],
    ledger: &mut TokenLedger,
    progress: &dyn ProgressSink,
    tool_schemas: &Value,
) -> Result<crate::model_client::ModelResponse, String> {
    let messages: Vec<Message> = turns
        .iter()
        .skip(1)
        .map(|t| Message { role: t.role, content: t.content.clone(), tool_use_id: None })
        .collect();
    let system_prompt = turns.first().map(|t| t.content.clone()).unwrap_or_default();

    let mut last_error = None;
    for (idx, client) in chain.clients().iter().enumerate() {
        let request = ModelRequest {
            model_id: client.model_id().to_string(),
            system_prompt: system_prompt.clone(),
            messages: messages.clone(),
            tool_schemas: tool_schemas.clone(),
            max_tokens: plan.max_tokens.max(1024),
            temperature: 0.2,
        };
        match client.generate(&request).await {
            Ok(response) => {
                ledger.record(
                    client.variant().ledger_provider(),
                    "agent",
                    response.usage.input,
                    response.usage.output,
                    client.model_id(),
                    0,
                );
                return Ok(response);
            }
            Err(e) => {
                let retry_worth = is_fallback_worthy_error(&e);
                last_error = Some(e.to_string());
                if idx + 1 < chain.clients().len() && retry_worth {
                    progress.emit(ProgressEvent {
                        stage: "error",
                        message: format!("model {} failed, falling back", client.model_id()),
                    });
                    continue;
                }
                break;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| "no model clients configured".to_string()))
}
