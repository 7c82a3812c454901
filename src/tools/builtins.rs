//! Compiled-in tool implementations: bash, file I/O, glob, grep, and the
//! single HTTP executor persisted tools dispatch through.
//!
//! Grounded in the teacher's `engine/tools.rs` (same crate choices: `ignore`
//! + `globset` for file search, `grep`/`grep-regex`/`grep-searcher` for
//! content search) and `state_fs/mod.rs`'s `safe_resolve` path-traversal
//! guard.

use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::{bad_input, Tool, ToolResult};
use crate::error::{CoreError, ToolErrorKind};

fn runtime_error(tool: &str, message: impl Into<String>) -> CoreError {
    CoreError::tool(ToolErrorKind::Runtime, tool, message)
}

fn timeout_error(tool: &str, timeout_secs: u64) -> CoreError {
    CoreError::tool(ToolErrorKind::Timeout, tool, format!("command exceeded {timeout_secs}s timeout"))
}

/// Runs `command` under `sh -c`, enforcing `timeout`: polls the child with
/// `try_wait` and kills it if the deadline passes before it exits. Stdout and
/// stderr are drained on background threads so a chatty child can't deadlock
/// on a full pipe while we poll.
fn run_with_timeout(command: &str, timeout: Duration) -> Result<(std::process::ExitStatus, String), CoreError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| runtime_error("bash", e.to_string()))?;

    let mut stdout_pipe = child.stdout.take().expect("piped stdout");
    let mut stderr_pipe = child.stderr.take().expect("piped stderr");
    let stdout_thread = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout_pipe.read_to_string(&mut buf);
        buf
    });
    let stderr_thread = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr_pipe.read_to_string(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().map_err(|e| runtime_error("bash", e.to_string()))? {
            Some(status) => break Some(status),
            None if Instant::now() >= deadline => break None,
            None => std::thread::sleep(Duration::from_millis(25)),
        }
    };

    let Some(status) = status else {
        let _ = child.kill();
        let _ = child.wait();
        let _ = stdout_thread.join();
        let _ = stderr_thread.join();
        return Err(timeout_error("bash", timeout.as_secs()));
    };

    let mut combined = stdout_thread.join().unwrap_or_default();
    combined.push_str(&stderr_thread.join().unwrap_or_default());
    Ok((status, combined))
}

/// Resolves `path` against `root`, rejecting any resolution that escapes it
/// (mirrors `state_fs::safe_resolve`).
fn safe_resolve(root: &Path, path: &str) -> Result<PathBuf, CoreError> {
    let candidate = root.join(path);
    let canonical_root = root
        .canonicalize()
        .map_err(|e| runtime_error("fs", format!("bad root {}: {e}", root.display())))?;
    let parent = candidate.parent().unwrap_or(root).to_path_buf();
    std::fs::create_dir_all(&parent).ok();
    let canonical_parent = parent
        .canonicalize()
        .unwrap_or_else(|_| canonical_root.clone());
    if !canonical_parent.starts_with(&canonical_root) {
        return Err(bad_input("fs", format!("path escapes root: {path}")));
    }
    Ok(candidate)
}

pub struct BashTool {
    pub timeout_secs: u64,
}

impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its combined stdout/stderr."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"command": {"type": "string"}}, "required": ["command"]})
    }

    fn execute(&self, input: &Value) -> Result<ToolResult, CoreError> {
        let command = input
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_input("bash", "missing `command`"))?;
        if command.trim().is_empty() {
            return Err(bad_input("bash", "empty command"));
        }

        let (status, combined) = run_with_timeout(command, Duration::from_secs(self.timeout_secs))?;

        if status.success() {
            Ok(ToolResult::ok(combined))
        } else {
            Ok(ToolResult::error(format!(
                "exit code {}: {combined}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}

pub struct ReadFileTool {
    pub root: PathBuf,
}

impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file relative to the workspace root."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]})
    }

    fn execute(&self, input: &Value) -> Result<ToolResult, CoreError> {
        let path = input
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_input("read_file", "missing `path`"))?;
        let resolved = safe_resolve(&self.root, path)?;
        match std::fs::read_to_string(&resolved) {
            Ok(content) => Ok(ToolResult::ok(content)),
            Err(e) => Ok(ToolResult::error(format!("cannot read {path}: {e}"))),
        }
    }
}

pub struct WriteFileTool {
    pub root: PathBuf,
}

impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a UTF-8 text file relative to the workspace root, creating parents as needed."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}}, "required": ["path", "content"]})
    }

    fn execute(&self, input: &Value) -> Result<ToolResult, CoreError> {
        let path = input
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_input("write_file", "missing `path`"))?;
        let content = input
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_input("write_file", "missing `content`"))?;
        let resolved = safe_resolve(&self.root, path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent).map_err(|e| runtime_error("write_file", e.to_string()))?;
        }
        std::fs::write(&resolved, content).map_err(|e| runtime_error("write_file", e.to_string()))?;
        Ok(ToolResult::ok(format!("wrote {} bytes to {path}", content.len())))
    }
}

pub struct GlobTool {
    pub root: PathBuf,
}

impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "List files under the workspace root matching a glob pattern."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"pattern": {"type": "string"}}, "required": ["pattern"]})
    }

    fn execute(&self, input: &Value) -> Result<ToolResult, CoreError> {
        let pattern = input
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_input("glob", "missing `pattern`"))?;
        let matcher = globset::Glob::new(pattern)
            .map_err(|e| bad_input("glob", e.to_string()))?
            .compile_matcher();

        let mut matches = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.root).build().flatten() {
            let path = entry.path();
            if let Ok(relative) = path.strip_prefix(&self.root) {
                if matcher.is_match(relative) {
                    matches.push(relative.display().to_string());
                }
            }
        }
        matches.sort();
        Ok(ToolResult::ok(matches.join("\n")))
    }
}

pub struct GrepTool {
    pub root: PathBuf,
}

impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents under the workspace root for a regular expression."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"pattern": {"type": "string"}}, "required": ["pattern"]})
    }

    fn execute(&self, input: &Value) -> Result<ToolResult, CoreError> {
        let pattern = input
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_input("grep", "missing `pattern`"))?;
        let matcher = grep_regex::RegexMatcher::new(pattern).map_err(|e| bad_input("grep", e.to_string()))?;

        let mut results = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.root).build().flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path().to_path_buf();
            let relative = path.strip_prefix(&self.root).unwrap_or(&path).display().to_string();
            let mut searcher = grep_searcher::Searcher::new();
            let _ = searcher.search_path(
                &matcher,
                &path,
                grep_searcher::sinks::UTF8(|line_number, line| {
                    results.push(format!("{relative}:{line_number}: {}", line.trim_end()));
                    Ok(true)
                }),
            );
        }
        Ok(ToolResult::ok(results.join("\n")))
    }
}

/// The single compiled-in executor `HttpRequestTemplate`-tagged persisted
/// tools dispatch through (§4.2 [ADDED]). Not registered as a standalone
/// builtin — invoked directly by the registry.
pub fn execute_http_request(
    method: &str,
    url: &str,
    headers: &std::collections::HashMap<String, String>,
) -> Result<ToolResult, CoreError> {
    let client = reqwest::blocking::Client::new();
    let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| bad_input("http", e.to_string()))?;
    let mut request = client.request(method, url);
    for (key, value) in headers {
        request = request.header(key, value);
    }
    let response = request.send().map_err(|e| runtime_error("http", e.to_string()))?;
    let status = response.status();
    let body = response.text().unwrap_or_default();
    if status.is_success() {
        Ok(ToolResult::ok(body))
    } else {
        Ok(ToolResult::error(format!("http status {status}: {body}")))
    }
}

/// Invokes a referenced script file via the same process-spawn path bash
/// uses — the registry never evaluates inline code (§4.2 [ADDED]).
pub fn execute_script_file(root: &Path, script_path: &Path) -> Result<ToolResult, CoreError> {
    let resolved = root.join(script_path);
    if !resolved.exists() {
        return Err(bad_input("script", format!("script not found: {}", resolved.display())));
    }
    let output = Command::new(&resolved)
        .output()
        .map_err(|e| runtime_error("script", e.to_string()))?;
    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.status.success() {
        Ok(ToolResult::ok(combined))
    } else {
        Ok(ToolResult::error(combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_rejects_empty_command() {
        let tool = BashTool { timeout_secs: 30 };
        let err = tool.execute(&json!({"command": "   "})).unwrap_err();
        assert!(matches!(err, CoreError::ToolError { kind: ToolErrorKind::BadInput, .. }));
    }

    #[test]
    fn bash_runs_and_captures_output() {
        let tool = BashTool { timeout_secs: 30 };
        let result = tool.execute(&json!({"command": "echo hello"})).unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("hello"));
    }

    #[test]
    fn bash_enforces_timeout() {
        let tool = BashTool { timeout_secs: 1 };
        let err = tool.execute(&json!({"command": "sleep 5"})).unwrap_err();
        assert!(matches!(err, CoreError::ToolError { kind: ToolErrorKind::Timeout, .. }));
    }

    #[test]
    fn write_then_read_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriteFileTool { root: dir.path().to_path_buf() };
        let reader = ReadFileTool { root: dir.path().to_path_buf() };
        writer
            .execute(&json!({"path": "notes.txt", "content": "hello world"}))
            .unwrap();
        let result = reader.execute(&json!({"path": "notes.txt"})).unwrap();
        assert_eq!(result.content, "hello world");
    }

    #[test]
    fn write_file_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriteFileTool { root: dir.path().to_path_buf() };
        let err = writer
            .execute(&json!({"path": "../../etc/passwd", "content": "x"}))
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolError { kind: ToolErrorKind::BadInput, .. }));
    }

    #[test]
    fn glob_finds_written_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        let tool = GlobTool { root: dir.path().to_path_buf() };
        let result = tool.execute(&json!({"pattern": "*.rs"})).unwrap();
        assert!(result.content.contains("a.rs"));
    }
}
