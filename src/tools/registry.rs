//! Tool Registry: builtin + persisted + promoted tools behind one map.
//!
//! Grounded in the teacher's `engine/tool_registry.rs::ToolRegistry`
//! (`execute` dispatch, `canonical_tool_name`, `tool_schema_json`).

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::builtins::{execute_http_request, execute_script_file, BashTool, GlobTool, GrepTool, ReadFileTool, WriteFileTool};
use super::persisted::{Handler, PersistedTool};
use super::{is_valid_tool_name, Tool, ToolInfo, ToolResult};
use crate::error::CoreError;

enum Entry {
    Builtin(Box<dyn Tool>),
    Persisted(PersistedTool),
}

impl Entry {
    fn description(&self) -> &str {
        match self {
            Entry::Builtin(tool) => tool.description(),
            Entry::Persisted(tool) => &tool.description,
        }
    }

    fn category(&self) -> Option<&str> {
        match self {
            Entry::Builtin(_) => None,
            Entry::Persisted(tool) => tool.category.as_deref(),
        }
    }
}

/// Single writer (registration at boot or via `register_custom`), many
/// readers; writes serialise through the lock, reads take a shared lock
/// (§5 — the in-memory map conceptually swaps atomically on write).
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    workspace_root: PathBuf,
    registry_dir: PathBuf,
    promoted_dir: PathBuf,
}

impl ToolRegistry {
    pub fn new(workspace_root: PathBuf, registry_dir: PathBuf, promoted_dir: PathBuf) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            workspace_root,
            registry_dir,
            promoted_dir,
        }
    }

    /// Boots the registry: builtins first, then persisted custom tools,
    /// then promoted tools — in that declared order (§4.2).
    pub fn boot(workspace_root: PathBuf, registry_dir: PathBuf, promoted_dir: PathBuf) -> Self {
        let registry = Self::new(workspace_root, registry_dir, promoted_dir);
        registry.register_builtins();
        for tool in PersistedTool::load_all(&registry.registry_dir) {
            if let Err(e) = registry.insert_persisted(tool) {
                tracing::warn!(error = %e, "skipping persisted tool at boot");
            }
        }
        for tool in PersistedTool::load_all(&registry.promoted_dir) {
            if let Err(e) = registry.insert_persisted(tool) {
                tracing::warn!(error = %e, "skipping promoted tool at boot");
            }
        }
        registry
    }

    fn register_builtins(&self) {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.insert("bash".to_string(), Entry::Builtin(Box::new(BashTool { timeout_secs: 120 })));
        entries.insert(
            "read_file".to_string(),
            Entry::Builtin(Box::new(ReadFileTool { root: self.workspace_root.clone() })),
        );
        entries.insert(
            "write_file".to_string(),
            Entry::Builtin(Box::new(WriteFileTool { root: self.workspace_root.clone() })),
        );
        entries.insert("glob".to_string(), Entry::Builtin(Box::new(GlobTool { root: self.workspace_root.clone() })));
        entries.insert("grep".to_string(), Entry::Builtin(Box::new(GrepTool { root: self.workspace_root.clone() })));
    }

    pub fn register(&self, tool: Box<dyn Tool>) -> Result<(), CoreError> {
        let name = tool.name().to_string();
        self.reject_if_taken(&name)?;
        self.entries.write().expect("registry lock poisoned").insert(name, Entry::Builtin(tool));
        Ok(())
    }

    /// Persists a new custom tool to disk and registers it in-memory.
    pub fn register_custom(&self, tool: PersistedTool) -> Result<(), CoreError> {
        if !is_valid_tool_name(&tool.name) {
            return Err(super::bad_input(&tool.name, "tool name must match ^[a-z][a-z0-9_]*$"));
        }
        self.reject_if_taken(&tool.name)?;
        tool.save(&self.registry_dir).map_err(|e| super::bad_input(&tool.name, e.to_string()))?;
        self.insert_persisted(tool)
    }

    fn insert_persisted(&self, tool: PersistedTool) -> Result<(), CoreError> {
        if !is_valid_tool_name(&tool.name) {
            return Err(super::bad_input(&tool.name, "tool name must match ^[a-z][a-z0-9_]*$"));
        }
        let name = tool.name.clone();
        self.entries.write().expect("registry lock poisoned").insert(name, Entry::Persisted(tool));
        Ok(())
    }

    fn reject_if_taken(&self, name: &str) -> Result<(), CoreError> {
        if self.entries.read().expect("registry lock poisoned").contains_key(name) {
            return Err(super::bad_input(name, format!("tool '{name}' already registered")));
        }
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.read().expect("registry lock poisoned").contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().expect("registry lock poisoned").keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<ToolInfo> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(name, entry)| ToolInfo {
                name: name.clone(),
                description: entry.description().to_string(),
                category: entry.category().map(str::to_string),
            })
            .collect()
    }

    pub fn list_by_category(&self, category: &str) -> Vec<ToolInfo> {
        self.all().into_iter().filter(|t| t.category.as_deref() == Some(category)).collect()
    }

    /// Only custom (persisted) tools may be removed; builtins are forbidden.
    pub fn remove(&self, name: &str) -> Result<(), CoreError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        match entries.get(name) {
            Some(Entry::Builtin(_)) => Err(super::bad_input(name, "cannot remove a builtin tool")),
            Some(Entry::Persisted(_)) => {
                entries.remove(name);
                let _ = std::fs::remove_file(PersistedTool::file_path(&self.registry_dir, name));
                Ok(())
            }
            None => Err(super::bad_input(name, "no such tool")),
        }
    }

    pub fn tool_schema_json(&self, allowed: Option<&[String]>) -> Value {
        let entries = self.entries.read().expect("registry lock poisoned");
        let mut schemas = Vec::new();
        for (name, entry) in entries.iter() {
            if let Some(allowed) = allowed {
                if !allowed.iter().any(|a| a == name) {
                    continue;
                }
            }
            let (description, schema) = match entry {
                Entry::Builtin(tool) => (tool.description().to_string(), tool.input_schema()),
                Entry::Persisted(tool) => (tool.description.clone(), tool.parameters.clone()),
            };
            schemas.push(serde_json::json!({
                "name": name,
                "description": description,
                "input_schema": schema,
            }));
        }
        schemas.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Value::Array(schemas)
    }

    pub fn execute(&self, name: &str, input: &Value) -> Result<ToolResult, CoreError> {
        let entries = self.entries.read().expect("registry lock poisoned");
        match entries.get(name) {
            Some(Entry::Builtin(tool)) => tool.execute(input),
            Some(Entry::Persisted(tool)) => self.execute_persisted(tool, input),
            None => Err(super::bad_input(name, format!("unknown tool '{name}'"))),
        }
    }

    fn execute_persisted(&self, tool: &PersistedTool, input: &Value) -> Result<ToolResult, CoreError> {
        let empty = serde_json::Map::new();
        let input_map = input.as_object().unwrap_or(&empty);
        match &tool.handler {
            Handler::ShellCommandTemplate { command_template } => {
                let rendered = PersistedTool::render_template(command_template, input_map);
                BashTool { timeout_secs: 120 }.execute(&serde_json::json!({"command": rendered}))
            }
            Handler::HttpRequestTemplate { method, url_template, headers } => {
                let url = PersistedTool::render_template(url_template, input_map);
                execute_http_request(method, &url, headers)
            }
            Handler::ScriptFileReference { script_path } => execute_script_file(&self.registry_dir, script_path),
        }
    }

    pub fn export(&self) -> Vec<PersistedTool> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .filter_map(|entry| match entry {
                Entry::Persisted(tool) => Some(tool.clone()),
                Entry::Builtin(_) => None,
            })
            .collect()
    }

    pub fn import(&self, tools: Vec<PersistedTool>) -> usize {
        let mut count = 0;
        for tool in tools {
            if self.insert_persisted(tool).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Canonicalizes aliases a caller might pass (e.g. legacy names) to the
    /// registered tool name, mirroring `canonical_tool_name` in the teacher.
    pub fn canonical_tool_name(&self, requested: &str) -> String {
        match requested {
            "shell" | "run_command" => "bash".to_string(),
            "read" => "read_file".to_string(),
            "write" => "write_file".to_string(),
            other => other.to_string(),
        }
    }
}

pub fn default_registry(workspace_root: PathBuf) -> ToolRegistry {
    ToolRegistry::boot(workspace_root, crate::paths::tools_dir(), crate::paths::promoted_tools_dir())
}

#[allow(dead_code)]
fn registry_dir_for(root: &Path) -> PathBuf {
    root.join("tools")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::persisted::Handler;
    use serde_json::json;

    fn test_registry() -> (tempfile::TempDir, ToolRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::boot(
            dir.path().to_path_buf(),
            dir.path().join("tools"),
            dir.path().join("tools_promoted"),
        );
        (dir, registry)
    }

    #[test]
    fn boots_with_builtins() {
        let (_dir, registry) = test_registry();
        assert!(registry.has("bash"));
        assert!(registry.has("read_file"));
        assert!(registry.has("write_file"));
    }

    #[test]
    fn cannot_remove_builtin() {
        let (_dir, registry) = test_registry();
        assert!(registry.remove("bash").is_err());
    }

    #[test]
    fn register_custom_roundtrips_and_executes() {
        let (_dir, registry) = test_registry();
        let tool = PersistedTool {
            name: "echo_tool".to_string(),
            description: "echoes".to_string(),
            parameters: json!({"type": "object"}),
            handler: Handler::ShellCommandTemplate { command_template: "echo {msg}".to_string() },
            category: Some("utility".to_string()),
        };
        registry.register_custom(tool).unwrap();
        assert!(registry.has("echo_tool"));
        let result = registry.execute("echo_tool", &json!({"msg": "hi"})).unwrap();
        assert!(result.content.contains("hi"));
    }

    #[test]
    fn rejects_invalid_name() {
        let (_dir, registry) = test_registry();
        let tool = PersistedTool {
            name: "Bad-Name".to_string(),
            description: "x".to_string(),
            parameters: json!({}),
            handler: Handler::ShellCommandTemplate { command_template: "echo hi".to_string() },
            category: None,
        };
        assert!(registry.register_custom(tool).is_err());
    }

    #[test]
    fn rejects_duplicate_name() {
        let (_dir, registry) = test_registry();
        let err = registry
            .register_custom(PersistedTool {
                name: "bash".to_string(),
                description: "x".to_string(),
                parameters: json!({}),
                handler: Handler::ShellCommandTemplate { command_template: "echo hi".to_string() },
                category: None,
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolError { .. }));
    }

    #[test]
    fn list_by_category_filters() {
        let (_dir, registry) = test_registry();
        registry
            .register_custom(PersistedTool {
                name: "deployer".to_string(),
                description: "deploys".to_string(),
                parameters: json!({}),
                handler: Handler::ShellCommandTemplate { command_template: "echo deploy".to_string() },
                category: Some("ops".to_string()),
            })
            .unwrap();
        let ops_tools = registry.list_by_category("ops");
        assert_eq!(ops_tools.len(), 1);
        assert_eq!(ops_tools[0].name, "deployer");
    }
}
