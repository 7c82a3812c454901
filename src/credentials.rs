//! Opaque credential store: get/put over a JSON file (§1 "out of scope:
//! credential stores and key rotation — specified only by their get/put
//! interface").
//!
//! Grounded directly in the teacher's `credentials.rs` (`Credentials`,
//! `CredentialEntry`, `resolve_api_key`'s config → file → env precedence),
//! renamed from a model-id-keyed map to the abstract get/put contract the
//! core actually needs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct CredentialStore {
    #[serde(flatten)]
    entries: HashMap<String, String>,
}

impl CredentialStore {
    /// Loads from `file`. Missing or malformed files are treated as an
    /// empty store, never a fatal error.
    pub fn load(file: &Path) -> Self {
        if !file.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(file) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, path = %file.display(), "credentials file corrupt, treating as empty");
                Self::default()
            }),
            Err(e) => {
                warn!(error = %e, path = %file.display(), "failed to read credentials file");
                Self::default()
            }
        }
    }

    pub fn save(&self, file: &Path) -> anyhow::Result<()> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(file, body)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn put(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match value {
            Some(v) if !v.is_empty() => {
                self.entries.insert(key, v);
            }
            _ => {
                self.entries.remove(&key);
            }
        }
    }
}

/// Resolves the effective API key for `model_id`: explicit config value,
/// then the credential store, then an environment variable
/// `CORE_API_KEY_{MODEL_ID}` (hyphens to underscores, uppercased).
pub fn resolve_api_key(model_id: &str, config_api_key: Option<&str>, store: &CredentialStore) -> Option<String> {
    if let Some(key) = config_api_key {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    if let Some(key) = store.get(model_id) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    let env_name = format!("CORE_API_KEY_{}", model_id.to_uppercase().replace('-', "_"));
    std::env::var(&env_name).ok().filter(|v| !v.is_empty())
}

pub fn default_credentials_file() -> PathBuf {
    crate::paths::credentials_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keys.json");
        let mut store = CredentialStore::default();
        store.put("fast", Some("sk-123".to_string()));
        store.save(&file).unwrap();

        let loaded = CredentialStore::load(&file);
        assert_eq!(loaded.get("fast"), Some("sk-123"));
    }

    #[test]
    fn missing_file_is_empty_not_fatal() {
        let store = CredentialStore::load(Path::new("/nonexistent/keys.json"));
        assert!(store.get("fast").is_none());
    }

    #[test]
    fn resolve_prefers_config_then_store_then_env() {
        let mut store = CredentialStore::default();
        store.put("fast", Some("from-store".to_string()));
        assert_eq!(resolve_api_key("fast", Some("from-config"), &store).as_deref(), Some("from-config"));
        assert_eq!(resolve_api_key("fast", None, &store).as_deref(), Some("from-store"));
    }

    #[test]
    fn put_none_removes_entry() {
        let mut store = CredentialStore::default();
        store.put("fast", Some("x".to_string()));
        store.put("fast", None);
        assert!(store.get("fast").is_none());
    }
}
