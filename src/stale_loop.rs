//! Stale-Loop Guard: halts an agent repeating, erroring, or emptying out
//! tool calls without progress (§4.8).
//!
//! Grounded in the teacher's `engine/tool_exec.rs` streak counters
//! (`redundant_tool_streak`, `empty_search_streak`, `last_tool_sig`),
//! generalized from loose fields on `LoopState` into a standalone struct per
//! REDESIGN FLAGS ("no global state" at component-boundary scale).

use serde_json::Value;
use std::collections::VecDeque;

use crate::error::CoreError;

const RING_BUFFER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub empty_threshold: u32,
    pub error_threshold: u32,
    pub repeat_threshold: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { empty_threshold: 3, error_threshold: 5, repeat_threshold: 4 }
    }
}

pub struct StaleLoopGuard {
    thresholds: Thresholds,
    consecutive_errors: u32,
    consecutive_empty: u32,
    recent_signatures: VecDeque<String>,
}

impl StaleLoopGuard {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            consecutive_errors: 0,
            consecutive_empty: 0,
            recent_signatures: VecDeque::with_capacity(RING_BUFFER_SIZE),
        }
    }

    fn is_empty_call(tool_name: &str, input: &Value) -> bool {
        match tool_name {
            "bash" => input.get("command").and_then(Value::as_str).map(|c| c.trim().is_empty()).unwrap_or(true),
            "write_file" => {
                let has_path = input.get("path").and_then(Value::as_str).map(|s| !s.is_empty()).unwrap_or(false);
                let has_content = input.get("content").is_some();
                !(has_path && has_content)
            }
            _ => input.as_object().map(|m| m.is_empty()).unwrap_or(true),
        }
    }

    fn signature(tool_name: &str, input: &Value) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        input.to_string().hash(&mut hasher);
        format!("{tool_name}:{:x}", hasher.finish())
    }

    /// Called by the Agent Driver after every tool invocation.
    pub fn record(&mut self, tool_name: &str, input: &Value, was_error: bool) -> Result<(), CoreError> {
        let is_empty = Self::is_empty_call(tool_name, input);

        self.consecutive_empty = if is_empty { self.consecutive_empty + 1 } else { 0 };
        self.consecutive_errors = if was_error || is_empty { self.consecutive_errors + 1 } else { 0 };

        let signature = Self::signature(tool_name, input);
        if self.recent_signatures.len() == RING_BUFFER_SIZE {
            self.recent_signatures.pop_front();
        }
        self.recent_signatures.push_back(signature);

        if self.consecutive_empty >= self.thresholds.empty_threshold {
            return Err(CoreError::StalledError { reason: format!("{} consecutive empty tool calls", self.consecutive_empty) });
        }
        if self.consecutive_errors >= self.thresholds.error_threshold {
            return Err(CoreError::StalledError { reason: format!("{} consecutive errored tool calls", self.consecutive_errors) });
        }
        if self.all_recent_identical() {
            return Err(CoreError::StalledError {
                reason: format!("same tool call repeated {} times", self.thresholds.repeat_threshold),
            });
        }
        Ok(())
    }

    fn all_recent_identical(&self) -> bool {
        if self.recent_signatures.len() < self.thresholds.repeat_threshold {
            return false;
        }
        let tail: Vec<&String> = self.recent_signatures.iter().rev().take(self.thresholds.repeat_threshold).collect();
        tail.windows(2).all(|w| w[0] == w[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repeat_threshold_halts_on_identical_calls() {
        let mut guard = StaleLoopGuard::new(Thresholds::default());
        let input = json!({"command": "foo"});
        for i in 0..3 {
            assert!(guard.record("bash", &input, false).is_ok(), "iteration {i} should not stall yet");
        }
        let result = guard.record("bash", &input, false);
        assert!(result.is_err());
    }

    #[test]
    fn empty_bash_commands_halt_at_threshold() {
        let mut guard = StaleLoopGuard::new(Thresholds::default());
        let empty = json!({"command": "   "});
        assert!(guard.record("bash", &empty, false).is_ok());
        assert!(guard.record("bash", &empty, false).is_ok());
        assert!(guard.record("bash", &empty, false).is_err());
    }

    #[test]
    fn successful_varied_calls_never_stall() {
        let mut guard = StaleLoopGuard::new(Thresholds::default());
        for i in 0..10 {
            let input = json!({"command": format!("echo {i}")});
            assert!(guard.record("bash", &input, false).is_ok());
        }
    }

    #[test]
    fn errors_reset_on_success() {
        let mut guard = StaleLoopGuard::new(Thresholds::default());
        let bad = json!({"command": "x"});
        guard.record("bash", &bad, true).unwrap();
        guard.record("bash", &bad, true).unwrap();
        let good = json!({"command": "y"});
        guard.record("bash", &good, false).unwrap();
        assert_eq!(guard.consecutive_errors, 0);
    }
}
