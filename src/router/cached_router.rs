//! `route()`: linear scan of the manifest, longest-pattern-first, first
//! match wins. Grounded in the teacher's `resolve_model`/policy-scan shape
//! in `agent_manager/routing.rs`, generalized to the Router Cache contract.

use super::{normalize_request, Category, Plan, RouterCacheManifest};

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub category_id: String,
    pub plan: Plan,
    pub skills_hint: Vec<String>,
    pub tools_hint: Vec<String>,
}

/// Deterministic: trims and lower-cases the request, then scans categories
/// ordered longest-pattern-first (ties broken by declared/insertion order).
/// The first matching category wins; no match returns `None` (`RouterMiss`,
/// informational only per §7).
pub fn route(manifest: &RouterCacheManifest, request: &str) -> Option<RouteResult> {
    let normalized = normalize_request(request);

    let mut ordered: Vec<(usize, &Category)> = manifest.categories.iter().enumerate().collect();
    ordered.sort_by(|(a_idx, a), (b_idx, b)| {
        b.specificity().cmp(&a.specificity()).then(a_idx.cmp(b_idx))
    });

    for (_, category) in ordered {
        if category.matches(&normalized) {
            return Some(RouteResult {
                category_id: category.id.clone(),
                plan: category.plan.clone(),
                skills_hint: category.skills_hint.clone(),
                tools_hint: category.tools_hint.clone(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Trigger;
    use std::collections::HashSet;

    fn direct_answer_category(id: &str, pattern: &str, answer: &str) -> Category {
        Category {
            id: id.to_string(),
            patterns: vec![Trigger::Regex(pattern.to_string())],
            plan: Plan::direct_answer(answer),
            skills_hint: Vec::new(),
            tools_hint: Vec::new(),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn e1_direct_echo() {
        let manifest = RouterCacheManifest {
            categories: vec![direct_answer_category("ping", "^ping$", "pong")],
            known_skills: HashSet::new(),
            known_tools: HashSet::new(),
        };
        let result = route(&manifest, "  Ping  ").expect("should match");
        assert_eq!(result.category_id, "ping");
        assert_eq!(result.plan.direct_answer.as_deref(), Some("pong"));
    }

    #[test]
    fn no_match_returns_none() {
        let manifest = RouterCacheManifest {
            categories: vec![direct_answer_category("ping", "^ping$", "pong")],
            known_skills: HashSet::new(),
            known_tools: HashSet::new(),
        };
        assert!(route(&manifest, "hello there").is_none());
    }

    #[test]
    fn longest_pattern_wins_over_shorter_match() {
        let broad = Category {
            id: "broad".to_string(),
            patterns: vec![Trigger::Keywords(vec!["deploy".to_string()])],
            plan: Plan::direct_answer("broad"),
            skills_hint: Vec::new(),
            tools_hint: Vec::new(),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let narrow = Category {
            id: "narrow".to_string(),
            patterns: vec![Trigger::Keywords(vec!["deploy".to_string(), "production".to_string()])],
            plan: Plan::direct_answer("narrow"),
            skills_hint: Vec::new(),
            tools_hint: Vec::new(),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let manifest = RouterCacheManifest {
            categories: vec![broad, narrow],
            known_skills: HashSet::new(),
            known_tools: HashSet::new(),
        };
        let result = route(&manifest, "deploy to production").unwrap();
        assert_eq!(result.category_id, "narrow");
    }

    #[test]
    fn route_is_deterministic_across_repeated_calls() {
        let manifest = RouterCacheManifest {
            categories: vec![direct_answer_category("ping", "^ping$", "pong")],
            known_skills: HashSet::new(),
            known_tools: HashSet::new(),
        };
        let first = route(&manifest, "ping").unwrap().category_id;
        let second = route(&manifest, "ping").unwrap().category_id;
        assert_eq!(first, second);
    }
}
