//! Persisted custom tools: tagged-variant handlers, never arbitrary source
//! (REDESIGN FLAGS, SPEC_FULL.md §4.2).
//!
//! Grounded in the teacher's `skills/marketplace.rs::download_to_temp` for
//! the write-to-temp-then-rename persistence, and `state_fs/mod.rs` for the
//! malformed-file-is-logged-and-skipped read discipline.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// The fixed set of handler shapes a persisted tool may declare. No variant
/// carries arbitrary evaluated code.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handler {
    ShellCommandTemplate { command_template: String },
    HttpRequestTemplate {
        method: String,
        url_template: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    ScriptFileReference { script_path: PathBuf },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistedTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub handler: Handler,
    pub category: Option<String>,
}

impl PersistedTool {
    /// Substitutes `{param}` placeholders in `template` from `input`, the
    /// way `ShellCommandTemplate`/`HttpRequestTemplate` render their bodies
    /// before dispatch to a compiled-in executor.
    pub fn render_template(template: &str, input: &serde_json::Map<String, serde_json::Value>) -> String {
        let mut rendered = template.to_string();
        for (key, value) in input {
            let placeholder = format!("{{{key}}}");
            let value_str = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &value_str);
        }
        rendered
    }

    pub fn file_path(registry_dir: &Path, name: &str) -> PathBuf {
        registry_dir.join(format!("{name}.json"))
    }

    pub fn save(&self, registry_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(registry_dir)?;
        let body = serde_json::to_vec_pretty(self)?;
        let mut tmp = NamedTempFile::new_in(registry_dir)?;
        use std::io::Write;
        tmp.write_all(&body)?;
        tmp.persist(Self::file_path(registry_dir, &self.name))?;
        Ok(())
    }

    /// Loads every `*.json` file in `registry_dir`. Malformed files are
    /// logged and skipped — never fatal (§4.2).
    pub fn load_all(registry_dir: &Path) -> Vec<PersistedTool> {
        let mut tools = Vec::new();
        let entries = match std::fs::read_dir(registry_dir) {
            Ok(v) => v,
            Err(_) => return tools,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<PersistedTool>(&raw) {
                    Ok(tool) => tools.push(tool),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed persisted tool"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to read persisted tool file"),
            }
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_template_substitutes_params() {
        let mut input = serde_json::Map::new();
        input.insert("path".to_string(), json!("src/main.rs"));
        let rendered = PersistedTool::render_template("cat {path}", &input);
        assert_eq!(rendered, "cat src/main.rs");
    }

    #[test]
    fn save_then_load_roundtrips_losslessly() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PersistedTool {
            name: "greet".to_string(),
            description: "says hi".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
            handler: Handler::ShellCommandTemplate { command_template: "echo hi".to_string() },
            category: Some("utility".to_string()),
        };
        tool.save(dir.path()).unwrap();
        let loaded = PersistedTool::load_all(dir.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, tool.name);
        assert_eq!(loaded[0].category, tool.category);
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        let loaded = PersistedTool::load_all(dir.path());
        assert!(loaded.is_empty());
    }
}
