//! `SmallModelClient`: a capability facade over the cheapest available
//! model, with derived capabilities built on top (§4.4).
//!
//! Grounded in the teacher's stated preference (`engine/mod.rs`,
//! `engine/context.rs`) for driving compaction/summarisation/filtering
//! through the same small-model call path rather than bespoke clients per
//! capability.

use super::{Message, ModelClient, ModelRequest, Role};
use crate::ledger::TokenLedger;
use crate::skills::Skill;

const RELEVANCE_FILTER_MAX_TOKENS: u64 = 256;
const SUMMARY_MAX_TOKENS: u64 = 512;

pub struct SmallModelClient {
    on_device: Option<ModelClient>,
    cloud_fallback: ModelClient,
}

impl SmallModelClient {
    pub fn new(on_device: Option<ModelClient>, cloud_fallback: ModelClient) -> Self {
        Self { on_device, cloud_fallback }
    }

    /// True when the on-device client is configured and genuinely reachable,
    /// or when there is no on-device client at all (cloud fallback is always
    /// considered "available" here).
    pub async fn available(&self) -> bool {
        match &self.on_device {
            Some(ModelClient::OnDeviceSmall(client)) => client.available().await,
            Some(_) | None => true,
        }
    }

    /// The client `generate` should try first: on-device when configured and
    /// actually reachable, cloud fallback otherwise.
    async fn active_client(&self) -> &ModelClient {
        if let Some(ModelClient::OnDeviceSmall(client)) = &self.on_device {
            if client.available().await {
                return self.on_device.as_ref().expect("checked Some above");
            }
        }
        &self.cloud_fallback
    }

    async fn try_generate(
        &self,
        client: &ModelClient,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u64,
        purpose: &str,
        ledger: &mut TokenLedger,
    ) -> Option<String> {
        let request = ModelRequest {
            model_id: client.model_id().to_string(),
            system_prompt: system_prompt.to_string(),
            messages: vec![Message::user(user_prompt)],
            tool_schemas: serde_json::Value::Null,
            max_tokens,
            temperature: 0.0,
        };

        match client.generate(&request).await {
            Ok(response) => {
                let text = response.text?;
                ledger.record(
                    client.variant().ledger_provider(),
                    purpose,
                    response.usage.input,
                    response.usage.output,
                    client.model_id(),
                    0,
                );
                Some(text)
            }
            Err(e) => {
                if let ModelClient::OnDeviceSmall(_) = client {
                    tracing::debug!(error = %e, "on-device small model call failed");
                } else {
                    tracing::warn!(error = %e, "small model call failed");
                }
                None
            }
        }
    }

    /// Returns `None` on any error — callers must treat that as "skip",
    /// never as a reason to fail the run. Records a ledger entry only on
    /// `Some`. An on-device failure retries once against `cloud_fallback`
    /// before giving up, per §4.4's "otherwise remote" clause.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u64,
        purpose: &str,
        ledger: &mut TokenLedger,
    ) -> Option<String> {
        let client = self.active_client().await;
        let used_on_device = matches!(client, ModelClient::OnDeviceSmall(_));

        if let Some(text) = self.try_generate(client, system_prompt, user_prompt, max_tokens, purpose, ledger).await {
            return Some(text);
        }

        if used_on_device {
            return self
                .try_generate(&self.cloud_fallback, system_prompt, user_prompt, max_tokens, purpose, ledger)
                .await;
        }

        None
    }

    /// Skill Relevance Filter: given a request and candidate skills, ask the
    /// model which are actually relevant. On any error/null, pass through
    /// unfiltered — never over-prune (§4.4).
    pub async fn filter_relevant_skills(
        &self,
        request: &str,
        candidates: &[Skill],
        ledger: &mut TokenLedger,
    ) -> Vec<Skill> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let listing = candidates
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Request: {request}\n\nCandidate skills:\n{listing}\n\nReturn only the names of skills truly relevant to the request, one per line."
        );
        let system = "You filter skill candidates for relevance. Respond with skill names only.";

        match self
            .generate(system, &prompt, RELEVANCE_FILTER_MAX_TOKENS, "skill_filter", ledger)
            .await
        {
            Some(text) => {
                let named: std::collections::HashSet<String> =
                    text.lines().map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty()).collect();
                let filtered: Vec<Skill> =
                    candidates.iter().filter(|s| named.contains(&s.name.to_lowercase())).cloned().collect();
                if filtered.is_empty() {
                    candidates.to_vec()
                } else {
                    filtered
                }
            }
            None => candidates.to_vec(),
        }
    }

    const SUMMARISE_THRESHOLD_CHARS: usize = 4000;
    const SUMMARISE_SKIP_BELOW_CHARS: usize = 500;

    /// Tool-Result Summariser: compacts an oversized tool result. Skips
    /// entirely below a smaller threshold (§4.4).
    pub async fn summarise_tool_result(
        &self,
        tool_name: &str,
        result: &str,
        ledger: &mut TokenLedger,
    ) -> Option<String> {
        if result.len() < Self::SUMMARISE_SKIP_BELOW_CHARS {
            return None;
        }
        if result.len() < Self::SUMMARISE_THRESHOLD_CHARS {
            return None;
        }
        let system = "Summarise tool output losslessly for the key facts an agent needs to continue.";
        let prompt = format!("Tool: {tool_name}\nOutput:\n{result}");
        self.generate(system, &prompt, SUMMARY_MAX_TOKENS, "tool_result_summary", ledger).await
    }

    /// Skill Prompt Optimiser: trims a skill's instructions to the minimum
    /// steps needed for this request.
    pub async fn optimise_skill_prompt(&self, request: &str, skill: &Skill, ledger: &mut TokenLedger) -> String {
        let system = "Condense skill instructions to only the steps needed for this specific request.";
        let prompt = format!("Request: {request}\n\nSkill '{}' instructions:\n{}", skill.name, skill.instructions);
        self.generate(system, &prompt, SUMMARY_MAX_TOKENS, "skill_prompt_optimise", ledger)
            .await
            .unwrap_or_else(|| skill.instructions.clone())
    }

    /// Summarises a contiguous conversation-window prefix into one synthetic
    /// assistant message, used by the Context Compactor (§4.7). `None` tells
    /// the caller to fall back to deterministic truncation.
    pub async fn summarise_conversation_window(&self, window_text: &str, ledger: &mut TokenLedger) -> Option<String> {
        let system = "Summarise this conversation excerpt into a compact note an agent can resume from.";
        self.generate(system, window_text, SUMMARY_MAX_TOKENS, "context_compaction", ledger).await
    }
}

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}
