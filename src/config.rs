//! On-disk configuration: model registry, routing policy, and server settings.
//!
//! Shape mirrors the teacher crate's `config.rs` (`Config`/`ModelConfig`), with
//! the routing table generalized from `agent_manager/routing.rs` into data
//! instead of hardcoded match arms.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::router::Tier;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cost_per_1m_input: f64,
    #[serde(default)]
    pub cost_per_1m_output: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    #[serde(default = "default_strong_model")]
    pub strong_model: String,
    #[serde(default)]
    pub on_device_model: Option<String>,
    #[serde(default)]
    pub on_device_url: Option<String>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fast_model: default_fast_model(),
            strong_model: default_strong_model(),
            on_device_model: None,
            on_device_url: None,
            rules: Vec::new(),
        }
    }
}

fn default_fast_model() -> String {
    "fast".to_string()
}

fn default_strong_model() -> String {
    "strong".to_string()
}

/// A user-overridable routing rule, sorted by `priority` before evaluation
/// (highest first), generalizing the teacher's hardcoded policy match arms.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingRule {
    pub category: String,
    pub tier: Tier,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
    #[serde(default)]
    pub allow_on_device: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            token_budget: default_token_budget(),
            allow_on_device: false,
        }
    }
}

fn default_max_iterations() -> usize {
    40
}

fn default_token_budget() -> u64 {
    200_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub retention_days: Option<u64>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            directory: None,
            retention_days: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            routing: RoutingConfig::default(),
            agent: AgentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

const CONFIG_FILE_NAME: &str = "core.toml";

impl Config {
    /// Loads `core.toml` from the current directory, falling back to
    /// defaults when absent, mirroring `Config::load()` in the teacher crate.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE_NAME))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn model_by_id(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Indexes models by id for quick lookup from the router/model_client layer.
    pub fn model_index(&self) -> HashMap<String, ModelConfig> {
        self.models
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect()
    }

    pub fn config_dir() -> PathBuf {
        PathBuf::from(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_routing() {
        let cfg = Config::default();
        assert_eq!(cfg.routing.fast_model, "fast");
        assert_eq!(cfg.routing.strong_model, "strong");
        assert_eq!(cfg.agent.max_iterations, 40);
    }

    #[test]
    fn load_missing_file_returns_default() {
        let cfg = Config::load_from(Path::new("/nonexistent/core.toml")).unwrap();
        assert!(cfg.models.is_empty());
    }

    #[test]
    fn load_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
            [[models]]
            id = "fast"
            provider = "openai"
            model = "gpt-4o-mini"
            cost_per_1m_input = 0.15
            cost_per_1m_output = 0.6

            [routing]
            fast_model = "fast"
            strong_model = "fast"
            "#,
        )
        .unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.models.len(), 1);
        assert_eq!(cfg.models[0].id, "fast");
        assert_eq!(cfg.routing.strong_model, "fast");
    }
}
