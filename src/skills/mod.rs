//! Skill Manifest: on-disk discovery and frontmatter parsing.
//!
//! Grounded in the teacher's `skills/mod.rs` (`Skill`, `SkillFrontmatter`,
//! `SkillManager::load_all`, nested-directory discovery), simplified to the
//! single canonical skills directory this crate's data-root layout declares
//! (`~/.core-runtime/skills/<name>/SKILL.md`).

pub mod resolver;

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub use resolver::{resolve, search};

#[derive(Debug)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub keywords: Vec<String>,
    pub scripts: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    name: String,
    description: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    scripts: Vec<PathBuf>,
}

const MAX_DESCRIPTION_LEN: usize = 1024;

/// `name` is filesystem-safe: lowercase ascii, digits, and `_`/`-` only.
fn is_filesystem_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Parses a `SKILL.md` file: a `---`-delimited YAML frontmatter block
/// followed by the markdown body (the procedure instructions).
pub fn parse_skill_file(path: &Path) -> anyhow::Result<Skill> {
    let raw = std::fs::read_to_string(path)?;
    let mut parts = raw.splitn(3, "---");
    let _leading = parts.next().unwrap_or("");
    let frontmatter_raw = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("missing frontmatter block in {}", path.display()))?;
    let body = parts.next().unwrap_or("").trim().to_string();

    let frontmatter: SkillFrontmatter = serde_yml::from_str(frontmatter_raw)?;
    if !is_filesystem_safe_name(&frontmatter.name) {
        anyhow::bail!("skill name '{}' is not filesystem-safe", frontmatter.name);
    }
    if frontmatter.description.len() > MAX_DESCRIPTION_LEN {
        anyhow::bail!("skill '{}' description exceeds {MAX_DESCRIPTION_LEN} chars", frontmatter.name);
    }

    let mut keywords = frontmatter.keywords;
    keywords.extend(resolver::extract_keywords(&body));
    keywords.sort();
    keywords.dedup();

    Ok(Skill {
        name: frontmatter.name,
        description: frontmatter.description,
        instructions: body,
        keywords,
        scripts: frontmatter.scripts,
    })
}

/// Recursively discovers `SKILL.md` files (or top-level `<name>.md` files)
/// under `root`. Malformed skills are logged and skipped, never fatal,
/// matching the file-layout discipline used for every other persisted store.
pub fn discover(root: &Path) -> Vec<Skill> {
    let mut skills = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    if !root.exists() {
        return skills;
    }
    for entry in walkdir_shallow(root) {
        let candidate = if entry.is_dir() {
            entry.join("SKILL.md")
        } else if entry.extension().and_then(|e| e.to_str()) == Some("md") {
            entry.clone()
        } else {
            continue;
        };
        if !candidate.exists() {
            continue;
        }
        match parse_skill_file(&candidate) {
            Ok(skill) => {
                if seen.insert(skill.name.clone()) {
                    skills.push(skill);
                } else {
                    tracing::warn!(name = %skill.name, "duplicate skill name, keeping first discovered");
                }
            }
            Err(e) => tracing::warn!(path = %candidate.display(), error = %e, "skipping malformed skill"),
        }
    }
    skills
}

fn walkdir_shallow(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            out.push(entry.path());
        }
    }
    out
}

pub struct SkillManifest {
    skills: std::sync::RwLock<Vec<Skill>>,
}

impl SkillManifest {
    pub fn new() -> Self {
        Self { skills: std::sync::RwLock::new(Vec::new()) }
    }

    pub fn boot(skills_dir: &Path) -> Self {
        let manifest = Self::new();
        manifest.refresh(skills_dir);
        manifest
    }

    /// Re-runs discovery and publishes the new set atomically (single
    /// writer, many readers — §5).
    pub fn refresh(&self, skills_dir: &Path) {
        let skills = discover(skills_dir);
        *self.skills.write().expect("skill manifest lock poisoned") = skills;
    }

    pub fn get(&self, name: &str) -> Option<Skill> {
        self.skills.read().expect("skill manifest lock poisoned").iter().find(|s| s.name == name).cloned()
    }

    pub fn summaries(&self) -> Vec<(String, String)> {
        self.skills
            .read()
            .expect("skill manifest lock poisoned")
            .iter()
            .map(|s| (s.name.clone(), s.description.clone()))
            .collect()
    }

    pub fn all(&self) -> Vec<Skill> {
        self.skills.read().expect("skill manifest lock poisoned").clone()
    }

    pub fn resolve(&self, request: &str) -> Vec<resolver::Candidate> {
        let skills = self.skills.read().expect("skill manifest lock poisoned");
        resolver::resolve(&skills, request)
    }

    pub fn search(&self, query: &str) -> Vec<resolver::Candidate> {
        let skills = self.skills.read().expect("skill manifest lock poisoned");
        resolver::search(&skills, query)
    }
}

impl Default for SkillManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Skill {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            instructions: self.instructions.clone(),
            keywords: self.keywords.clone(),
            scripts: self.scripts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &Path, name: &str, description: &str, body: &str) {
        let skill_dir = dir.join(name);
        std::fs::create_dir_all(&skill_dir).unwrap();
        let content = format!("---\nname: {name}\ndescription: {description}\n---\n{body}\n");
        std::fs::write(skill_dir.join("SKILL.md"), content).unwrap();
    }

    #[test]
    fn discovers_skills_from_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "deploy_app", "Deploys the app to production", "Run the deploy steps.");
        let skills = discover(dir.path());
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "deploy_app");
    }

    #[test]
    fn malformed_skill_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("broken");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), "no frontmatter here").unwrap();
        let skills = discover(dir.path());
        assert!(skills.is_empty());
    }

    #[test]
    fn rejects_unsafe_name() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "Deploy App", "desc", "body");
        let skills = discover(dir.path());
        assert!(skills.is_empty());
    }
}
