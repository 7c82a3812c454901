//! Scheduled Task persistence: a single JSON store behind one mutex,
//! written atomically (§4.11, §5).
//!
//! Grounded in the teacher's `state_fs/mod.rs` (atomic single-file JSON
//! store, malformed-file-as-absent read discipline) and
//! `skills/marketplace.rs`'s temp-file-then-rename write helper.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Once,
    Recurring,
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    /// The request text re-entered into the core on each firing.
    pub command: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_minutes: Option<i64>,
    pub next_run_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ScheduledTask {
    pub fn new_once(name: impl Into<String>, command: impl Into<String>, run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            command: command.into(),
            task_type: TaskType::Once,
            cron_expression: None,
            interval_minutes: None,
            next_run_at: run_at,
            last_run_at: None,
            status: TaskStatus::Pending,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn new_recurring(name: impl Into<String>, command: impl Into<String>, cron_expression: impl Into<String>, first_run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            command: command.into(),
            task_type: TaskType::Recurring,
            cron_expression: Some(cron_expression.into()),
            interval_minutes: None,
            next_run_at: first_run_at,
            last_run_at: None,
            status: TaskStatus::Pending,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn new_interval(name: impl Into<String>, command: impl Into<String>, interval_minutes: i64, first_run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            command: command.into(),
            task_type: TaskType::Interval,
            cron_expression: None,
            interval_minutes: Some(interval_minutes),
            next_run_at: first_run_at,
            last_run_at: None,
            status: TaskStatus::Pending,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_run_at <= now
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct TaskStoreFile {
    tasks: Vec<ScheduledTask>,
}

/// All mutations serialise through a single mutex; the tick loop holds it
/// only while reading the due set and persisting updates, never while a
/// task is executing (§5).
pub struct TaskStore {
    path: PathBuf,
    inner: Mutex<TaskStoreFile>,
}

impl TaskStore {
    pub fn boot(path: PathBuf) -> Self {
        let inner = Self::read_file(&path).unwrap_or_default();
        Self { path, inner: Mutex::new(inner) }
    }

    fn read_file(path: &Path) -> Option<TaskStoreFile> {
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "task store corrupt, starting empty");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to read task store");
                None
            }
        }
    }

    async fn persist(&self, file: &TaskStoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(file)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        use std::io::Write;
        tmp.write_all(&body)?;
        tmp.persist(&self.path)?;
        Ok(())
    }

    pub async fn insert(&self, task: ScheduledTask) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.tasks.push(task);
        self.persist(&guard).await
    }

    pub async fn all(&self) -> Vec<ScheduledTask> {
        self.inner.lock().await.tasks.clone()
    }

    pub async fn due(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        self.inner.lock().await.tasks.iter().filter(|t| t.is_due(now)).cloned().collect()
    }

    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ScheduledTask),
    {
        let mut guard = self.inner.lock().await;
        if let Some(task) = guard.tasks.iter_mut().find(|t| t.id == id) {
            mutate(task);
        }
        self.persist(&guard).await
    }

    /// Removes completed tasks whose `last_run_at` predates `cutoff`.
    pub async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut guard = self.inner.lock().await;
        let before = guard.tasks.len();
        guard
            .tasks
            .retain(|t| !(t.status == TaskStatus::Completed && t.last_run_at.map(|r| r < cutoff).unwrap_or(false)));
        let removed = before - guard.tasks.len();
        if removed > 0 {
            self.persist(&guard).await?;
        }
        Ok(removed)
    }
}

pub fn default_store_path() -> PathBuf {
    crate::paths::scheduler_dir().join("tasks.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let store = TaskStore::boot(path.clone());
        store.insert(ScheduledTask::new_once("ping", "ping", Utc::now())).await.unwrap();

        let reloaded = TaskStore::boot(path);
        assert_eq!(reloaded.all().await.len(), 1);
    }

    #[tokio::test]
    async fn due_filters_by_next_run_at_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::boot(dir.path().join("tasks.json"));
        let now = Utc::now();
        store.insert(ScheduledTask::new_once("past", "x", now - chrono::Duration::seconds(5))).await.unwrap();
        store.insert(ScheduledTask::new_once("future", "x", now + chrono::Duration::seconds(5))).await.unwrap();

        let due = store.due(now).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "past");
    }

    #[tokio::test]
    async fn purge_removes_old_completed_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::boot(dir.path().join("tasks.json"));
        let now = Utc::now();
        let mut old_done = ScheduledTask::new_once("old", "x", now);
        old_done.status = TaskStatus::Completed;
        old_done.last_run_at = Some(now - chrono::Duration::days(10));
        store.insert(old_done).await.unwrap();
        store.insert(ScheduledTask::new_once("pending", "x", now)).await.unwrap();

        let removed = store.purge_completed_before(now - chrono::Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_store_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, b"not json").unwrap();
        let store = TaskStore::boot(path);
        assert!(store.all().await.is_empty());
    }
}
