//! Persistent router cache: load/generate/sync/is_stale over the Category
//! manifest, written atomically (temp file + rename), grounded in the
//! teacher's `skills/marketplace.rs::download_to_temp` pattern and
//! `state_fs/mod.rs`'s treat-malformed-as-absent read discipline.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

use super::{Category, Plan, Tier, Trigger};
use crate::skills::Skill;
use crate::tools::ToolInfo;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RouterCacheManifest {
    pub categories: Vec<Category>,
    /// Skill/tool names recorded at the last `generate`/`sync`, used by
    /// `is_stale` to detect drift via symmetric difference.
    pub known_skills: HashSet<String>,
    pub known_tools: HashSet<String>,
}

impl RouterCacheManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the manifest from `path`. A missing or malformed file is
    /// treated as absent (`Ok(None)`), never an error — §6's "malformed file
    /// is treated as absent and logged" rule.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "router cache unreadable, treating as absent");
                return Ok(None);
            }
        };
        match serde_json::from_str::<Self>(&raw) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "router cache corrupt, discarding");
                Ok(None)
            }
        }
    }

    /// Seeds the manifest with a small set of built-in categories before
    /// handing control to the caller-supplied classifier for further
    /// request-pattern discovery (SPEC_FULL.md §4.5 [ADDED]).
    pub fn generate(skills: &[Skill], tools: &[ToolInfo]) -> Self {
        let mut manifest = Self::new();

        manifest.categories.push(Category {
            id: "ping".to_string(),
            patterns: vec![Trigger::Regex("^ping$".to_string())],
            plan: Plan::direct_answer("pong"),
            skills_hint: Vec::new(),
            tools_hint: Vec::new(),
            generated_at: now_iso(),
        });

        let skills_hint: Vec<String> = skills.iter().map(|s| s.name.clone()).collect();
        let tools_hint: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        manifest.categories.push(Category {
            id: "skills_hint".to_string(),
            patterns: vec![Trigger::Keywords(vec!["__never_matches__".to_string()])],
            plan: Plan {
                tier: Tier::FastCloud,
                tool_set: HashSet::new(),
                skill_set: Vec::new(),
                prompt_template_id: None,
                max_iterations: 0,
                max_tokens: 0,
                analysis: Default::default(),
                direct_answer: None,
            },
            skills_hint,
            tools_hint,
            generated_at: now_iso(),
        });

        manifest.known_skills = skills.iter().map(|s| s.name.clone()).collect();
        manifest.known_tools = tools.iter().map(|t| t.name.clone()).collect();
        manifest
    }

    /// Stale iff the symmetric difference between recorded and current
    /// skill/tool name sets is non-empty.
    pub fn is_stale(&self, skills: &[Skill], tools: &[ToolInfo]) -> bool {
        let current_skills: HashSet<String> = skills.iter().map(|s| s.name.clone()).collect();
        let current_tools: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();
        symmetric_difference_nonempty(&self.known_skills, &current_skills)
            || symmetric_difference_nonempty(&self.known_tools, &current_tools)
    }

    /// Incremental append: never rewrites existing categories, only adds
    /// hints for names not yet covered by any category.
    pub fn sync(&mut self, skills: &[Skill], tools: &[ToolInfo]) {
        let covered_skills: HashSet<&str> = self
            .categories
            .iter()
            .flat_map(|c| c.skills_hint.iter().map(String::as_str))
            .collect();
        let covered_tools: HashSet<&str> = self
            .categories
            .iter()
            .flat_map(|c| c.tools_hint.iter().map(String::as_str))
            .collect();

        let new_skills: Vec<String> = skills
            .iter()
            .map(|s| s.name.clone())
            .filter(|n| !covered_skills.contains(n.as_str()))
            .collect();
        let new_tools: Vec<String> = tools
            .iter()
            .map(|t| t.name.clone())
            .filter(|n| !covered_tools.contains(n.as_str()))
            .collect();

        if !new_skills.is_empty() || !new_tools.is_empty() {
            if let Some(hint_category) = self.categories.iter_mut().find(|c| c.id == "skills_hint") {
                hint_category.skills_hint.extend(new_skills);
                hint_category.tools_hint.extend(new_tools);
            } else {
                self.categories.push(Category {
                    id: "skills_hint".to_string(),
                    patterns: vec![Trigger::Keywords(vec!["__never_matches__".to_string()])],
                    plan: Plan {
                        tier: Tier::FastCloud,
                        tool_set: HashSet::new(),
                        skill_set: Vec::new(),
                        prompt_template_id: None,
                        max_iterations: 0,
                        max_tokens: 0,
                        analysis: Default::default(),
                        direct_answer: None,
                    },
                    skills_hint: new_skills,
                    tools_hint: new_tools,
                    generated_at: now_iso(),
                });
            }
        }

        self.known_skills = skills.iter().map(|s| s.name.clone()).collect();
        self.known_tools = tools.iter().map(|t| t.name.clone()).collect();
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(self)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        use std::io::Write;
        tmp.write_all(&body)?;
        tmp.persist(path)?;
        Ok(())
    }
}

fn symmetric_difference_nonempty(a: &HashSet<String>, b: &HashSet<String>) -> bool {
    a.symmetric_difference(b).next().is_some()
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn manifest_path() -> PathBuf {
    super::default_manifest_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_skill(name: &str) -> Skill {
        Skill {
            name: name.to_string(),
            description: "test skill".to_string(),
            instructions: "do the thing".to_string(),
            keywords: vec!["thing".to_string()],
            scripts: Vec::new(),
        }
    }

    fn sample_tool(name: &str) -> ToolInfo {
        ToolInfo {
            name: name.to_string(),
            description: "test tool".to_string(),
            category: None,
        }
    }

    #[test]
    fn generate_seeds_ping_and_hints() {
        let manifest = RouterCacheManifest::generate(&[sample_skill("deploy")], &[sample_tool("bash")]);
        assert!(manifest.categories.iter().any(|c| c.id == "ping"));
        let hint = manifest.categories.iter().find(|c| c.id == "skills_hint").unwrap();
        assert_eq!(hint.skills_hint, vec!["deploy".to_string()]);
        assert!(!manifest.is_stale(&[sample_skill("deploy")], &[sample_tool("bash")]));
    }

    #[test]
    fn is_stale_detects_new_skill() {
        let manifest = RouterCacheManifest::generate(&[], &[]);
        assert!(manifest.is_stale(&[sample_skill("new_skill")], &[]));
    }

    #[test]
    fn sync_is_incremental_append() {
        let mut manifest = RouterCacheManifest::generate(&[sample_skill("a")], &[]);
        let before = manifest.categories.len();
        manifest.sync(&[sample_skill("a"), sample_skill("b")], &[]);
        assert_eq!(manifest.categories.len(), before);
        let hint = manifest.categories.iter().find(|c| c.id == "skills_hint").unwrap();
        assert!(hint.skills_hint.contains(&"b".to_string()));
        assert!(!manifest.is_stale(&[sample_skill("a"), sample_skill("b")], &[]));
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        assert!(RouterCacheManifest::load(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = RouterCacheManifest::generate(&[sample_skill("a")], &[sample_tool("bash")]);
        manifest.save(&path).unwrap();
        let loaded = RouterCacheManifest::load(&path).unwrap().unwrap();
        assert_eq!(loaded.categories.len(), manifest.categories.len());
    }

    #[test]
    fn malformed_file_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(RouterCacheManifest::load(&path).unwrap().is_none());
    }
}
