//! Core Orchestrator: wires the router, skill resolver, and agent driver
//! into the per-request pipeline (§4.10).
//!
//! Grounded in the teacher's `engine/mod.rs::run_agent_loop` (overall shape:
//! analyze → select tools/skills → run → post-process) and
//! `agent_manager/routing.rs` (tier selection feeding a single entry point),
//! generalized onto the abstract Plan/Category/Analysis model from §3.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::agent_driver::cloud_loop::{run_cloud_loop, CloudLoopArgs};
use crate::agent_driver::on_device_loop::{run_on_device_loop, ALLOWED_TOOLS as ON_DEVICE_ALLOWED_TOOLS};
use crate::agent_driver::{ModelChain, ProgressEvent, ProgressSink, RunResult, ToolCallRecord};
use crate::config::Config;
use crate::error::CoreError;
use crate::ledger::{PriceTable, TokenLedger, Totals};
use crate::model_client::small_model::SmallModelClient;
use crate::model_client::ModelClient;
use crate::router::{cached_router, Analysis, Complexity, RouterCacheManifest, Tier};
use crate::skills::{resolver::HIGH_CONFIDENCE_THRESHOLD, Skill, SkillManifest};
use crate::tools::ToolRegistry;

const CONTINUATION_PROMPT: &str = "Continue the task from where you left off. Do not repeat tool calls you already made.";

/// The shape every `run()` returns (§7).
#[derive(Debug, Clone, Default)]
pub struct BotResult {
    pub success: bool,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub iterations: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub token_usage: Totals,
    pub analysis: Analysis,
    pub ledger_report: String,
    pub created_files: Vec<String>,
}

/// Hook for the out-of-scope self-improvement pipeline (§1): the
/// orchestrator only decides *whether* to call it (§4.10 step 11 predicate),
/// never what it does. Mirrors the `ProgressSink`/`SkillAutoCreator`-style
/// pluggable-interface pattern used elsewhere in this crate.
pub trait SkillAutoCreator: Send + Sync {
    fn maybe_create(&self, request: &str, analysis: &Analysis);
}

pub struct NullSkillAutoCreator;

impl SkillAutoCreator for NullSkillAutoCreator {
    fn maybe_create(&self, _request: &str, _analysis: &Analysis) {}
}

pub struct CoreOrchestrator {
    tools: Arc<ToolRegistry>,
    skills: Arc<SkillManifest>,
    router_cache: Arc<RwLock<RouterCacheManifest>>,
    router_cache_path: PathBuf,
    on_device: ModelClient,
    fast_cloud: ModelClient,
    strong_cloud: ModelClient,
    skill_auto_creator: Option<Arc<dyn SkillAutoCreator>>,
    config: Config,
    price_table: PriceTable,
}

impl CoreOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tools: Arc<ToolRegistry>,
        skills: Arc<SkillManifest>,
        router_cache: Arc<RwLock<RouterCacheManifest>>,
        router_cache_path: PathBuf,
        on_device: ModelClient,
        fast_cloud: ModelClient,
        strong_cloud: ModelClient,
        skill_auto_creator: Option<Arc<dyn SkillAutoCreator>>,
        config: Config,
        price_table: PriceTable,
    ) -> Self {
        Self {
            tools,
            skills,
            router_cache,
            router_cache_path,
            on_device,
            fast_cloud,
            strong_cloud,
            skill_auto_creator,
            config,
            price_table,
        }
    }

    pub async fn run(&self, request: &str, progress: &dyn ProgressSink) -> BotResult {
        self.run_with_policy(request, progress, true).await
    }

    /// Like [`run`](Self::run), but takes a [`CancellationToken`] the caller
    /// can cancel from another task. Cancellation aborts the current model
    /// call, skips any pending tool calls, and returns within one iteration
    /// with `BotResult{success: false, error: Some("cancelled")}` (§5).
    pub async fn run_cancellable(&self, request: &str, progress: &dyn ProgressSink, cancel: &CancellationToken) -> BotResult {
        self.run_with_policy_cancellable(request, progress, true, cancel).await
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn skills(&self) -> &SkillManifest {
        &self.skills
    }

    /// Routes `request` without executing it, for the CLI's `route` subcommand.
    pub fn route_debug(&self, request: &str) -> String {
        let manifest = self.router_cache.read().expect("router cache lock poisoned").clone();
        match cached_router::route(&manifest, request) {
            Some(rr) => format!("category={} tier={:?}", rr.category_id, rr.plan.tier),
            None => "no match (router miss)".to_string(),
        }
    }

    /// `allow_continuation` is the "caller policy" gate in step 11: when
    /// `false`, a truncated run is returned as-is instead of being
    /// automatically re-invoked with the continuation prompt.
    pub async fn run_with_policy(&self, request: &str, progress: &dyn ProgressSink, allow_continuation: bool) -> BotResult {
        self.run_with_policy_cancellable(request, progress, allow_continuation, &CancellationToken::new()).await
    }

    pub async fn run_with_policy_cancellable(
        &self,
        request: &str,
        progress: &dyn ProgressSink,
        allow_continuation: bool,
        cancel: &CancellationToken,
    ) -> BotResult {
        progress.emit(ProgressEvent { stage: "start", message: request.to_string() });
        let mut ledger = TokenLedger::new(self.price_table.clone());
        let small_model = SmallModelClient::new(Some(self.on_device.clone()), self.fast_cloud.clone());

        if cancel.is_cancelled() {
            return cancelled_result(&ledger);
        }

        // Step 1: route.
        let manifest_snapshot = self.router_cache.read().expect("router cache lock poisoned").clone();
        let route_result = cached_router::route(&manifest_snapshot, request);
        progress.emit(ProgressEvent { stage: "routed", message: format!("{:?}", route_result.as_ref().map(|r| &r.category_id)) });

        // Step 2: early exit.
        if let Some(rr) = &route_result {
            if rr.plan.tier == Tier::DirectAnswer {
                return BotResult {
                    success: true,
                    answer: rr.plan.direct_answer.clone(),
                    error: None,
                    iterations: 0,
                    tool_calls: Vec::new(),
                    token_usage: Totals::default(),
                    analysis: rr.plan.analysis.clone(),
                    ledger_report: ledger.format_report(),
                    created_files: Vec::new(),
                };
            }
        }

        // Step 3: skill resolution + relevance filter.
        progress.emit(ProgressEvent { stage: "skills", message: "resolving skills".to_string() });
        let candidates = self.skills.resolve(request);
        let candidate_skills: Vec<Skill> = candidates.iter().filter_map(|c| self.skills.get(&c.name)).collect();
        let filtered_skills = small_model.filter_relevant_skills(request, &candidate_skills, &mut ledger).await;

        // Step 4: analysis.
        progress.emit(ProgressEvent { stage: "analyzing", message: "deriving run plan".to_string() });
        let analysis = match &route_result {
            Some(rr) => rr.plan.analysis.clone(),
            None => match candidates.first() {
                Some(top) if top.score >= HIGH_CONFIDENCE_THRESHOLD => {
                    let matched = filtered_skills.iter().any(|s| s.name == top.name);
                    fast_path_analysis(top.name.clone(), matched)
                }
                _ => self.llm_analyze(request, &mut ledger).await,
            },
        };
        progress.emit(ProgressEvent { stage: "analyzed", message: format!("{:?}", analysis.complexity) });

        // Step 5: on-device attempt.
        let on_device_skill = analysis.skill_name.as_ref().and_then(|name| self.skills.get(name));
        if self.config.agent.allow_on_device && on_device_eligible(&analysis) {
            match run_on_device_loop(
                &self.on_device,
                request,
                on_device_skill.as_ref(),
                &self.tools,
                &small_model,
                &mut ledger,
                cancel,
            )
            .await
            {
                Ok(Some(answer)) => {
                    return BotResult {
                        success: true,
                        answer: Some(answer),
                        error: None,
                        iterations: 0,
                        tool_calls: Vec::new(),
                        token_usage: ledger.overall_totals(),
                        analysis,
                        ledger_report: ledger.format_report(),
                        created_files: Vec::new(),
                    };
                }
                Ok(None) => {
                    // Falls through to `fast_cloud`, per §4.9.2.
                }
                Err(CoreError::Cancelled) => {
                    return BotResult { analysis, ..cancelled_result(&ledger) };
                }
                Err(_) => {
                    // Non-cancellation errors fall through to `fast_cloud` too.
                }
            }
        }

        // Step 6: merge router-supplied skill hints.
        let mut skill_set: Vec<Skill> = filtered_skills;
        if let Some(rr) = &route_result {
            let already: HashSet<&str> = skill_set.iter().map(|s| s.name.as_str()).collect();
            let hinted: Vec<Skill> = rr
                .skills_hint
                .iter()
                .filter(|name| !already.contains(name.as_str()))
                .filter_map(|name| self.skills.get(name))
                .collect();
            let accepted = small_model.filter_relevant_skills(request, &hinted, &mut ledger).await;
            skill_set.extend(accepted);
        }

        // Step 7: compose plan budgets.
        let (max_iterations, max_tokens) = plan_budgets(&analysis, !skill_set.is_empty());

        // Step 8: compose system prompt.
        let template_id = route_result.as_ref().and_then(|rr| rr.plan.prompt_template_id.clone());
        let mut system_prompt = render_system_prompt(template_id.as_deref());
        for skill in &skill_set {
            let instructions = if analysis.complexity != Complexity::Complex {
                small_model.optimise_skill_prompt(request, skill, &mut ledger).await
            } else {
                skill.instructions.clone()
            };
            system_prompt.push_str(&format!("\n\n## Skill: {}\n{}\n", skill.name, instructions));
        }

        // Step 9: select tools.
        progress.emit(ProgressEvent { stage: "selected", message: format!("{} skills, tier resolved", skill_set.len()) });
        let tool_set: HashSet<String> = if let Some(rr) = &route_result {
            let mut set: HashSet<String> = rr.plan.tool_set.clone();
            if set.is_empty() {
                set.extend(rr.tools_hint.iter().cloned());
            }
            set.extend(ON_DEVICE_ALLOWED_TOOLS.iter().map(|s| s.to_string()));
            set
        } else {
            self.tools.names().into_iter().collect()
        };
        let allowed: Vec<String> = tool_set.into_iter().filter(|name| self.tools.has(name)).collect();

        let tier = route_result.as_ref().map(|rr| rr.plan.tier).unwrap_or(Tier::FastCloud);
        let plan = crate::router::Plan {
            tier,
            tool_set: allowed.iter().cloned().collect(),
            skill_set: skill_set.iter().map(|s| s.name.clone()).collect(),
            prompt_template_id: template_id,
            max_iterations,
            max_tokens,
            analysis: analysis.clone(),
            direct_answer: None,
        };

        // Step 10: execute.
        progress.emit(ProgressEvent { stage: "executing", message: "starting agent run".to_string() });
        let model_chain = self.model_chain_for(tier);
        let run_result = run_cloud_loop(CloudLoopArgs {
            plan: &plan,
            system_prompt: &system_prompt,
            user_prompt: request,
            model_chain: &model_chain,
            tool_registry: &self.tools,
            small_model: &small_model,
            progress,
            ledger: &mut ledger,
            cancel,
        })
        .await;

        // Step 11: post-process.
        let final_result = if run_result.success && run_result.truncated && allow_continuation {
            self.continue_truncated_run(&plan, &system_prompt, request, &model_chain, &small_model, &mut ledger, run_result, progress, cancel).await
        } else {
            run_result
        };

        if final_result.success {
            if skill_creation_predicate(&analysis) {
                if let Some(creator) = &self.skill_auto_creator {
                    creator.maybe_create(request, &analysis);
                } else {
                    tracing::debug!("skill-creation predicate met but no auto-creator configured, skipping");
                }
            }
            self.sync_router_cache();
        }

        if final_result.success {
            progress.emit(ProgressEvent { stage: "complete", message: "run finished".to_string() });
        } else {
            progress.emit(ProgressEvent { stage: "error", message: final_result.error.clone().unwrap_or_default() });
        }

        BotResult {
            success: final_result.success,
            answer: final_result.answer,
            error: final_result.error,
            iterations: final_result.iterations,
            tool_calls: final_result.tool_calls,
            token_usage: ledger.overall_totals(),
            analysis,
            ledger_report: ledger.format_report(),
            created_files: Vec::new(),
        }
    }

    async fn continue_truncated_run(
        &self,
        plan: &crate::router::Plan,
        system_prompt: &str,
        original_request: &str,
        model_chain: &ModelChain,
        small_model: &SmallModelClient,
        ledger: &mut TokenLedger,
        first: RunResult,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> RunResult {
        let continuation_prompt = format!("{original_request}\n\n{CONTINUATION_PROMPT}");
        let second = run_cloud_loop(CloudLoopArgs {
            plan,
            system_prompt,
            user_prompt: &continuation_prompt,
            model_chain,
            tool_registry: &self.tools,
            small_model,
            progress,
            ledger,
            cancel,
        })
        .await;

        let mut tool_calls = first.tool_calls;
        tool_calls.extend(second.tool_calls);
        RunResult {
            success: second.success,
            answer: second.answer.or(first.answer),
            error: second.error,
            iterations: first.iterations + second.iterations,
            tool_calls,
            truncated: second.truncated,
        }
    }

    fn model_chain_for(&self, tier: Tier) -> ModelChain {
        match tier {
            Tier::StrongCloud => ModelChain::new(self.strong_cloud.clone(), vec![self.fast_cloud.clone()]),
            _ => ModelChain::new(self.fast_cloud.clone(), vec![self.strong_cloud.clone()]),
        }
    }

    /// Step 4's fallback: invoke the cheapest tier (the small-model client)
    /// as an LLM-based analyzer. On parse failure or a null response, falls
    /// back to a conservative `Moderate`-complexity analysis so step 5 never
    /// mistakenly attempts the constrained on-device path.
    async fn llm_analyze(&self, request: &str, ledger: &mut TokenLedger) -> Analysis {
        let small_model = SmallModelClient::new(Some(self.on_device.clone()), self.fast_cloud.clone());
        let system = "Classify this request. Respond with JSON: {\"complexity\":\"simple|moderate|complex\",\"estimated_steps\":N,\"requires_bash\":bool,\"requires_file_ops\":bool,\"definition_of_done\":\"...\",\"potential_tools\":[...]}";
        let raw = small_model.generate(system, request, 256, "analysis", ledger).await;
        let draft = raw.and_then(|text| serde_json::from_str::<AnalysisDraft>(&text).ok());
        match draft {
            Some(draft) => Analysis {
                complexity: draft.complexity,
                estimated_steps: draft.estimated_steps,
                requires_bash: draft.requires_bash,
                requires_file_ops: draft.requires_file_ops,
                definition_of_done: draft.definition_of_done,
                potential_tools: draft.potential_tools,
                skill_matched: false,
                skill_name: None,
            },
            None => Analysis { complexity: Complexity::Moderate, estimated_steps: 1, ..Analysis::default() },
        }
    }

    fn sync_router_cache(&self) {
        let mut manifest = self.router_cache.write().expect("router cache lock poisoned");
        manifest.sync(&self.skills.all(), &self.tools.all());
        if let Err(e) = manifest.save(&self.router_cache_path) {
            warn!(error = %e, "router cache sync failed, suppressing (§7)");
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisDraft {
    #[serde(default)]
    complexity: Complexity,
    #[serde(default)]
    estimated_steps: u32,
    #[serde(default)]
    requires_bash: bool,
    #[serde(default)]
    requires_file_ops: bool,
    #[serde(default)]
    definition_of_done: String,
    #[serde(default)]
    potential_tools: Vec<String>,
}

fn fast_path_analysis(skill_name: String, matched: bool) -> Analysis {
    Analysis {
        complexity: Complexity::Simple,
        estimated_steps: 1,
        requires_bash: false,
        requires_file_ops: false,
        definition_of_done: format!("satisfy the request using skill '{skill_name}'"),
        potential_tools: Vec::new(),
        skill_matched: matched,
        skill_name: if matched { Some(skill_name) } else { None },
    }
}

/// §4.10 step 5: eligible iff complexity is the cheapest tier and every
/// potential tool is within the on-device constrained set.
fn on_device_eligible(analysis: &Analysis) -> bool {
    analysis.complexity == Complexity::Simple
        && analysis.potential_tools.iter().all(|t| ON_DEVICE_ALLOWED_TOOLS.contains(&t.as_str()))
}

/// §4.10 step 7: skill-backed runs get fewer iterations; file-op-heavy
/// tasks get a larger token budget.
fn plan_budgets(analysis: &Analysis, skill_backed: bool) -> (usize, u64) {
    let base_iterations = match analysis.complexity {
        Complexity::Simple => 4,
        Complexity::Moderate => 12,
        Complexity::Complex => 30,
    };
    let max_iterations = if skill_backed { (base_iterations.saturating_sub(3)).max(1) } else { base_iterations };

    let base_tokens: u64 = 40_000;
    let max_tokens = if analysis.requires_file_ops { base_tokens * 2 } else { base_tokens };
    (max_iterations, max_tokens)
}

/// §4.10 step 11's predicate: not already skill-backed AND (complexity
/// isn't simple OR the task needed 2+ steps).
fn skill_creation_predicate(analysis: &Analysis) -> bool {
    !analysis.skill_matched && (analysis.complexity != Complexity::Simple || analysis.estimated_steps >= 2)
}

fn cancelled_result(ledger: &TokenLedger) -> BotResult {
    BotResult {
        success: false,
        answer: None,
        error: Some(CoreError::Cancelled.to_string()),
        iterations: 0,
        tool_calls: Vec::new(),
        token_usage: ledger.overall_totals(),
        analysis: Analysis::default(),
        ledger_report: ledger.format_report(),
        created_files: Vec::new(),
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous coding and operations agent. Use the available tools to satisfy the request, then give a concise final answer.";

fn render_system_prompt(template_id: Option<&str>) -> String {
    match template_id {
        Some("terse") => "You are a terse automation agent. Use tools minimally and answer in one sentence.".to_string(),
        Some("thorough") => {
            "You are a meticulous automation agent. Verify your work with tools before answering.".to_string()
        }
        _ => DEFAULT_SYSTEM_PROMPT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_client::OnDeviceClient;
    use crate::router::{Category, Plan, Trigger};

    fn test_orchestrator(dir: &std::path::Path) -> CoreOrchestrator {
        let tools = Arc::new(ToolRegistry::boot(dir.to_path_buf(), dir.join("tools"), dir.join("tools_promoted")));
        let skills = Arc::new(SkillManifest::boot(&dir.join("skills")));
        let manifest = RouterCacheManifest::generate(&skills.all(), &tools.all());
        let router_cache = Arc::new(RwLock::new(manifest));
        let on_device = ModelClient::OnDeviceSmall(OnDeviceClient::new(Some("http://127.0.0.1:1".to_string()), "small"));
        CoreOrchestrator::new(
            tools,
            skills,
            router_cache,
            dir.join("router/manifest.json"),
            on_device.clone(),
            on_device.clone(),
            on_device,
            None,
            Config::default(),
            PriceTable::default(),
        )
    }

    #[tokio::test]
    async fn e1_direct_answer_is_zero_cost() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = test_orchestrator(dir.path());
        {
            let mut manifest = orchestrator.router_cache.write().unwrap();
            manifest.categories.insert(
                0,
                Category {
                    id: "ping".to_string(),
                    patterns: vec![Trigger::Regex("^ping$".to_string())],
                    plan: Plan::direct_answer("pong"),
                    skills_hint: Vec::new(),
                    tools_hint: Vec::new(),
                    generated_at: "2026-01-01T00:00:00Z".to_string(),
                },
            );
        }

        let result = orchestrator.run("ping", &crate::agent_driver::NullProgressSink).await;
        assert!(result.success);
        assert_eq!(result.answer.as_deref(), Some("pong"));
        assert_eq!(result.iterations, 0);
        assert!(result.tool_calls.is_empty());
        assert_eq!(result.token_usage.cost, 0.0);
    }

    #[test]
    fn skill_creation_predicate_requires_unmatched_and_nontrivial() {
        let trivial_matched = Analysis { skill_matched: true, complexity: Complexity::Simple, estimated_steps: 1, ..Analysis::default() };
        assert!(!skill_creation_predicate(&trivial_matched));

        let complex_unmatched = Analysis { skill_matched: false, complexity: Complexity::Complex, estimated_steps: 1, ..Analysis::default() };
        assert!(skill_creation_predicate(&complex_unmatched));

        let simple_unmatched_one_step = Analysis { skill_matched: false, complexity: Complexity::Simple, estimated_steps: 1, ..Analysis::default() };
        assert!(!skill_creation_predicate(&simple_unmatched_one_step));
    }

    #[test]
    fn plan_budgets_reduce_iterations_when_skill_backed() {
        let analysis = Analysis { complexity: Complexity::Moderate, ..Analysis::default() };
        let (without_skill, _) = plan_budgets(&analysis, false);
        let (with_skill, _) = plan_budgets(&analysis, true);
        assert!(with_skill < without_skill);
    }

    #[test]
    fn plan_budgets_raise_tokens_for_file_ops() {
        let analysis = Analysis { requires_file_ops: true, ..Analysis::default() };
        let (_, with_files) = plan_budgets(&analysis, false);
        let (_, without_files) = plan_budgets(&Analysis::default(), false);
        assert!(with_files > without_files);
    }
}
