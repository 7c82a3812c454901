//! Router Cache data model: categories, plans, and the tiered execution ladder.
//!
//! Grounded in the teacher's `agent_manager/routing.rs` (tier/complexity
//! shapes) generalized per SPEC_FULL.md §3 into the abstract Plan/Category
//! model, plus `engine/types.rs`'s `PlanItem`/`Plan` naming conventions.

pub mod cache;
pub mod cached_router;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

pub use cache::RouterCacheManifest;
pub use cached_router::{route, RouteResult};

/// The cheapest viable execution path, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    DirectAnswer,
    OnDevice,
    FastCloud,
    StrongCloud,
}

/// A compiled match trigger for a [`Category`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Regex(String),
    Keywords(Vec<String>),
}

impl Trigger {
    /// Length used to order triggers longest-first, so the most specific
    /// pattern wins when more than one would otherwise match.
    pub fn specificity(&self) -> usize {
        match self {
            Trigger::Regex(pattern) => pattern.len(),
            Trigger::Keywords(words) => words.iter().map(|w| w.len()).sum(),
        }
    }

    pub fn matches(&self, normalized_request: &str) -> bool {
        match self {
            Trigger::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(normalized_request))
                .unwrap_or(false),
            Trigger::Keywords(words) => {
                !words.is_empty() && words.iter().all(|w| normalized_request.contains(w.as_str()))
            }
        }
    }
}

/// The structured outcome of the cheapest-tier analyzer (SPEC_FULL.md §3).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Analysis {
    pub complexity: Complexity,
    pub estimated_steps: u32,
    pub requires_bash: bool,
    pub requires_file_ops: bool,
    pub definition_of_done: String,
    pub potential_tools: Vec<String>,
    /// Whether a skill actually backed this run (post relevance-filter).
    pub skill_matched: bool,
    pub skill_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

/// Immutable, per-run parameters for one agent execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Plan {
    pub tier: Tier,
    pub tool_set: HashSet<String>,
    pub skill_set: Vec<String>,
    pub prompt_template_id: Option<String>,
    pub max_iterations: usize,
    pub max_tokens: u64,
    pub analysis: Analysis,
    /// Only meaningful when `tier == DirectAnswer`.
    pub direct_answer: Option<String>,
}

impl Plan {
    pub fn direct_answer(answer: impl Into<String>) -> Self {
        Self {
            tier: Tier::DirectAnswer,
            tool_set: HashSet::new(),
            skill_set: Vec::new(),
            prompt_template_id: None,
            max_iterations: 0,
            max_tokens: 0,
            analysis: Analysis::default(),
            direct_answer: Some(answer.into()),
        }
    }

    /// §3 invariant (ii): `direct_answer`/`on_device` tiers must stick to a
    /// small set of tools.
    pub fn respects_tier_tool_bound(&self, on_device_allowed: &HashSet<String>) -> bool {
        match self.tier {
            Tier::DirectAnswer | Tier::OnDevice => self.tool_set.is_subset(on_device_allowed),
            Tier::FastCloud | Tier::StrongCloud => true,
        }
    }
}

/// A manifest entry: match triggers plus a pre-baked [`Plan`] template.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Category {
    pub id: String,
    pub patterns: Vec<Trigger>,
    pub plan: Plan,
    pub skills_hint: Vec<String>,
    pub tools_hint: Vec<String>,
    pub generated_at: String,
}

impl Category {
    /// Longest-pattern-first specificity, used to break ties when more than
    /// one category could otherwise match the same request (§4.6).
    pub fn specificity(&self) -> usize {
        self.patterns.iter().map(Trigger::specificity).max().unwrap_or(0)
    }

    pub fn matches(&self, normalized_request: &str) -> bool {
        self.patterns.iter().any(|t| t.matches(normalized_request))
    }
}

/// Normalises a request the way `route()` does: trim, then lower-case.
pub fn normalize_request(request: &str) -> String {
    request.trim().to_lowercase()
}

pub fn default_manifest_path() -> PathBuf {
    crate::paths::router_dir().join("manifest.json")
}
