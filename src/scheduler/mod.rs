//! Task Scheduler: a tick loop that re-enters the core on cron/interval/
//! one-shot triggers (§4.11).
//!
//! Grounded in the teacher's `server/idle_scheduler.rs` (`tokio::time::interval`
//! tick loop, per-item try/skip-on-busy discipline), adapted from a
//! fixed idle-prompt dispatch to the general `ScheduledTask` model in §3.

pub mod task_store;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::time;
use tracing::{info, warn};

pub use task_store::{ScheduledTask, TaskStatus, TaskStore, TaskType};

use crate::orchestrator::{BotResult, CoreOrchestrator};
use crate::agent_driver::NullProgressSink;

pub const DEFAULT_TICK_SECS: u64 = 60;
const PURGE_EVERY_N_TICKS: u64 = 100;
const PURGE_RETENTION: chrono::Duration = chrono::Duration::days(7);

pub struct Scheduler {
    store: Arc<TaskStore>,
    orchestrator: Arc<CoreOrchestrator>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<TaskStore>, orchestrator: Arc<CoreOrchestrator>, tick_interval: Duration) -> Self {
        Self { store, orchestrator, tick_interval }
    }

    /// Runs the tick loop forever. Each tick pops the due set, executes
    /// tasks sequentially, and every `PURGE_EVERY_N_TICKS` ticks purges
    /// stale completed tasks (§4.11).
    pub async fn run_forever(&self) {
        let mut interval = time::interval(self.tick_interval);
        let mut tick_count: u64 = 0;
        loop {
            interval.tick().await;
            tick_count += 1;
            self.tick(Utc::now()).await;
            if tick_count % PURGE_EVERY_N_TICKS == 0 {
                let cutoff = Utc::now() - PURGE_RETENTION;
                match self.store.purge_completed_before(cutoff).await {
                    Ok(removed) if removed > 0 => info!(removed, "purged stale completed tasks"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "failed to purge completed tasks"),
                }
            }
        }
    }

    /// One tick at a fixed `now`, exposed separately so tests (and the CLI's
    /// `scheduler tick` subcommand) can drive it deterministically.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let due = self.store.due(now).await;
        for task in due {
            self.run_one(task, now).await;
        }
    }

    async fn run_one(&self, task: ScheduledTask, now: DateTime<Utc>) {
        let id = task.id.clone();

        if let Some(cron_expr) = &task.cron_expression {
            if Schedule::from_str(cron_expr).is_err() {
                warn!(task = %task.name, cron = %cron_expr, "unparseable cron expression, marking failed");
                let _ = self.store.update(&id, |t| t.status = TaskStatus::Failed).await;
                return;
            }
        }

        let _ = self.store.update(&id, |t| t.status = TaskStatus::Running).await;

        let result: BotResult = self.orchestrator.run(&task.command, &NullProgressSink).await;
        if !result.success {
            warn!(task = %task.name, error = ?result.error, "scheduled task run failed");
        }

        let _ = self
            .store
            .update(&id, |t| {
                t.last_run_at = Some(now);
                match t.task_type {
                    TaskType::Once => t.status = TaskStatus::Completed,
                    TaskType::Recurring => match recompute_cron_next_run(t, now) {
                        Some(next) => {
                            t.next_run_at = next;
                            t.status = TaskStatus::Pending;
                        }
                        None => t.status = TaskStatus::Failed,
                    },
                    TaskType::Interval => {
                        let minutes = t.interval_minutes.unwrap_or(1).max(1);
                        t.next_run_at = now + chrono::Duration::minutes(minutes);
                        t.status = TaskStatus::Pending;
                    }
                }
            })
            .await;
    }
}

/// Recomputes `next_run_at` deterministically from `last_run_at` and the
/// cron expression: the schedule's next match strictly after `now` (§3, §8
/// property 10).
fn recompute_cron_next_run(task: &ScheduledTask, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expr = task.cron_expression.as_ref()?;
    let schedule = Schedule::from_str(expr).ok()?;
    schedule.after(&now).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ledger::PriceTable;
    use crate::model_client::{ModelClient, OnDeviceClient};
    use crate::router::RouterCacheManifest;
    use crate::skills::SkillManifest;
    use crate::tools::ToolRegistry;
    use std::sync::RwLock;

    fn test_orchestrator(dir: &std::path::Path) -> Arc<CoreOrchestrator> {
        let tools = Arc::new(ToolRegistry::boot(
            dir.to_path_buf(),
            dir.join("tools"),
            dir.join("tools_promoted"),
        ));
        let skills = Arc::new(SkillManifest::boot(&dir.join("skills")));
        let manifest = RouterCacheManifest::generate(&skills.all(), &tools.all());
        let router_cache = Arc::new(RwLock::new(manifest));
        let on_device = ModelClient::OnDeviceSmall(OnDeviceClient::new(Some("http://127.0.0.1:1".to_string()), "small"));
        Arc::new(CoreOrchestrator::new(
            tools,
            skills,
            router_cache,
            dir.join("router/manifest.json"),
            on_device.clone(),
            on_device.clone(),
            on_device,
            None,
            Config::default(),
            PriceTable::default(),
        ))
    }

    #[tokio::test]
    async fn one_shot_task_completes_after_one_tick() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::boot(dir.path().join("tasks.json")));
        let now = Utc::now();
        store
            .insert(ScheduledTask::new_once("ping", "ping", now - chrono::Duration::seconds(1)))
            .await
            .unwrap();

        let orchestrator = test_orchestrator(dir.path());
        let scheduler = Scheduler::new(store.clone(), orchestrator, Duration::from_secs(60));
        scheduler.tick(now).await;

        let tasks = store.all().await;
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert!(tasks[0].last_run_at.is_some());
    }

    #[tokio::test]
    async fn bad_cron_marks_failed_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::boot(dir.path().join("tasks.json")));
        let now = Utc::now();
        store
            .insert(ScheduledTask::new_recurring("bad", "ping", "not a cron expr", now - chrono::Duration::seconds(1)))
            .await
            .unwrap();

        let orchestrator = test_orchestrator(dir.path());
        let scheduler = Scheduler::new(store.clone(), orchestrator, Duration::from_secs(60));
        scheduler.tick(now).await;

        let tasks = store.all().await;
        assert_eq!(tasks[0].status, TaskStatus::Failed);
    }

    #[test]
    fn cron_next_run_is_strictly_after_now() {
        let task = ScheduledTask::new_recurring("every_minute", "ping", "0 * * * * *", Utc::now());
        let now = Utc::now();
        let next = recompute_cron_next_run(&task, now).unwrap();
        assert!(next > now);
    }
}
