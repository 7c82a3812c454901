//! Deterministic keyword/scoring resolution — no model invocation.
//!
//! The teacher's `skills/mod.rs` has no equivalent scoring function (it only
//! does prefix-based trigger matching); this is newly authored per
//! SPEC_FULL.md §4.3, grounded in the weighting shape from
//! `other_examples`' `model_router.rs` (deterministic table lookup with a
//! fixed fallback) applied to token-overlap scoring instead of a lookup
//! table.

use std::collections::HashSet;

use super::Skill;

const NAME_WEIGHT: f64 = 3.0;
const KEYWORD_WEIGHT: f64 = 2.0;
const DESCRIPTION_WEIGHT: f64 = 1.0;

/// Scores at or above this are "high confidence" (§4.3, §8 property 9).
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.5;

const MAX_KEYWORDS: usize = 32;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "to", "of", "in", "on", "for", "and", "or", "is", "are", "be", "with",
    "this", "that", "it", "as", "at", "by", "from", "into", "your", "you", "will", "can", "not",
];

#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub score: f64,
}

fn normalize_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Hand-rolled keyword-density scan over a skill body: lower-case, strip
/// punctuation, split on whitespace, drop stopwords, keep tokens that
/// repeat or are longer than 4 characters, capped at 32 keywords.
pub fn extract_keywords(body: &str) -> Vec<String> {
    let tokens = normalize_tokens(body);
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for token in &tokens {
        if STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    let mut keywords: Vec<String> = counts
        .into_iter()
        .filter(|(word, count)| *count > 1 || word.len() > 4)
        .map(|(word, _)| word)
        .collect();
    keywords.sort();
    keywords.truncate(MAX_KEYWORDS);
    keywords
}

fn weighted_overlap(request_tokens: &HashSet<String>, source_tokens: &HashSet<String>) -> f64 {
    if source_tokens.is_empty() {
        return 0.0;
    }
    let overlap = request_tokens.intersection(source_tokens).count();
    overlap as f64 / source_tokens.len() as f64
}

fn score_skill(skill: &Skill, request_tokens: &HashSet<String>) -> f64 {
    let name_tokens: HashSet<String> = normalize_tokens(&skill.name).into_iter().collect();
    let keyword_tokens: HashSet<String> = skill.keywords.iter().cloned().collect();
    let description_tokens: HashSet<String> = normalize_tokens(&skill.description).into_iter().collect();

    let weighted_sum = NAME_WEIGHT * weighted_overlap(request_tokens, &name_tokens)
        + KEYWORD_WEIGHT * weighted_overlap(request_tokens, &keyword_tokens)
        + DESCRIPTION_WEIGHT * weighted_overlap(request_tokens, &description_tokens);
    let weight_total = NAME_WEIGHT + KEYWORD_WEIGHT + DESCRIPTION_WEIGHT;
    (weighted_sum / weight_total).min(1.0)
}

/// Deterministic, descending score, insertion-order tiebreak. Never invokes
/// a model (§4.3).
pub fn resolve(skills: &[Skill], request: &str) -> Vec<Candidate> {
    let request_tokens: HashSet<String> = normalize_tokens(request).into_iter().collect();
    let mut candidates: Vec<Candidate> = skills
        .iter()
        .enumerate()
        .map(|(idx, skill)| (idx, Candidate { name: skill.name.clone(), score: score_skill(skill, &request_tokens) }))
        .collect::<Vec<_>>()
        .into_iter()
        .filter(|(_, c)| c.score > 0.0)
        .collect();
    candidates.sort_by(|(a_idx, a), (b_idx, b)| {
        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a_idx.cmp(b_idx))
    });
    candidates.into_iter().map(|(_, c)| c).collect()
}

/// Returns every skill with score > 0, not just the top-N, for a `skills
/// search` CLI subcommand (§4.3 [ADDED]).
pub fn search(skills: &[Skill], query: &str) -> Vec<Candidate> {
    resolve(skills, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str, description: &str, keywords: &[&str]) -> Skill {
        Skill {
            name: name.to_string(),
            description: description.to_string(),
            instructions: String::new(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            scripts: Vec::new(),
        }
    }

    #[test]
    fn name_match_scores_highest() {
        let skills = vec![
            skill("deploy_app", "Deploys applications", &["deploy"]),
            skill("unrelated", "Something else entirely", &[]),
        ];
        let results = resolve(&skills, "deploy the app please");
        assert_eq!(results[0].name, "deploy_app");
        assert!(results[0].score >= HIGH_CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn descending_score_with_insertion_tiebreak() {
        let skills = vec![skill("alpha", "test thing", &["test"]), skill("beta", "test thing", &["test"])];
        let results = resolve(&skills, "test");
        assert_eq!(results[0].name, "alpha");
        assert_eq!(results[1].name, "beta");
        assert_eq!(results[0].score, results[1].score);
    }

    #[test]
    fn no_overlap_yields_no_candidates() {
        let skills = vec![skill("alpha", "completely unrelated", &["zzz"])];
        let results = resolve(&skills, "something else entirely different");
        assert!(results.is_empty());
    }

    #[test]
    fn keyword_extraction_drops_stopwords_and_short_words() {
        let keywords = extract_keywords("the app will run a build and then a deploy and a deploy again");
        assert!(!keywords.contains(&"the".to_string()));
        assert!(keywords.contains(&"deploy".to_string()));
    }

    #[test]
    fn search_returns_all_nonzero_matches() {
        let skills = vec![skill("alpha", "deploy service", &["deploy"]), skill("beta", "deploy service", &["deploy"])];
        let results = search(&skills, "deploy");
        assert_eq!(results.len(), 2);
    }
}
