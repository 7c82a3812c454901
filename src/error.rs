//! Error taxonomy for the core (spec §7).
//!
//! Components that need callers to match on a specific failure surface a
//! [`CoreError`] variant; everything else propagates via `anyhow::Result`
//! with `CoreError` mapped in at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// No category matched. Never surfaces to the end user.
    #[error("router miss")]
    RouterMiss,

    #[error("auth error ({provider}): {message}")]
    AuthError { provider: String, message: String },

    #[error("tool error ({tool}, {kind:?}): {message}")]
    ToolError {
        kind: ToolErrorKind,
        tool: String,
        message: String,
    },

    #[error("stalled: {reason}")]
    StalledError { reason: String },

    #[error("budget exceeded after {iterations} iterations")]
    BudgetExceeded { iterations: usize },

    #[error("cache corruption in {path}: {message}")]
    CacheCorruption { path: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    BadInput,
    Timeout,
    Runtime,
}

impl CoreError {
    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::InternalError(msg.into())
    }

    pub fn tool(kind: ToolErrorKind, tool: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::ToolError {
            kind,
            tool: tool.into(),
            message: message.into(),
        }
    }
}
