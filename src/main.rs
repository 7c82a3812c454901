//! CLI entry point: wires config, logging, and every persisted store into a
//! [`CoreOrchestrator`], then dispatches one subcommand (SPEC_FULL.md §1).
//!
//! Grounded in the teacher's `main.rs` (`Cli`/`Subcommand` shape via clap,
//! lightweight subcommands dispatched before heavier state is constructed).

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tiered_core::config::Config;
use tiered_core::credentials::{resolve_api_key, CredentialStore};
use tiered_core::ledger::PriceTable;
use tiered_core::logging::{self, LoggingSettings};
use tiered_core::model_client::cloud::CloudModelClient;
use tiered_core::model_client::on_device::OnDeviceClient;
use tiered_core::model_client::ModelClient;
use tiered_core::orchestrator::CoreOrchestrator;
use tiered_core::paths;
use tiered_core::router::RouterCacheManifest;
use tiered_core::scheduler::{Scheduler, TaskStore};
use tiered_core::skills::SkillManifest;
use tiered_core::tools::ToolRegistry;

const DEFAULT_CLOUD_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Parser, Debug)]
#[command(name = "tiered-core", version)]
#[command(about = "Tiered execution core: route, run, and schedule agent requests", long_about = None)]
struct Cli {
    /// Workspace root used by file-touching builtin tools. Defaults to the current directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a request through the full orchestrator pipeline.
    Run {
        request: String,
    },
    /// Route a request without executing it; prints the matched category (if any).
    Route {
        request: String,
    },
    /// Inspect the tool registry.
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
    /// Inspect or search installed skills.
    Skills {
        #[command(subcommand)]
        action: SkillsAction,
    },
    /// Drive the task scheduler.
    Scheduler {
        #[command(subcommand)]
        action: SchedulerAction,
    },
}

#[derive(Subcommand, Debug)]
enum ToolsAction {
    /// List every registered tool.
    List,
}

#[derive(Subcommand, Debug)]
enum SkillsAction {
    /// List every discovered skill.
    List,
    /// Search skills by keyword relevance.
    Search { query: String },
}

#[derive(Subcommand, Debug)]
enum SchedulerAction {
    /// Run one tick against the persisted task store, then exit.
    Tick,
    /// Run the tick loop forever.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("warning: failed to load config, using defaults: {e}");
        Config::default()
    });

    let log_dir = logging::setup_tracing_with_settings(LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
    })?;
    info!(log_dir = %log_dir.display(), "logging initialized");

    let cli = Cli::parse();
    let workspace_root = cli.root.clone().unwrap_or_else(|| PathBuf::from("."));

    let tools = Arc::new(ToolRegistry::boot(workspace_root, paths::tools_dir(), paths::promoted_tools_dir()));
    let skills = Arc::new(SkillManifest::boot(&paths::skills_dir()));

    let router_cache_path = paths::router_dir().join("manifest.json");
    let manifest = match RouterCacheManifest::load(&router_cache_path) {
        Ok(Some(manifest)) if !manifest.is_stale(&skills.all(), &tools.all()) => manifest,
        Ok(Some(mut manifest)) => {
            manifest.sync(&skills.all(), &tools.all());
            manifest
        }
        Ok(None) => RouterCacheManifest::generate(&skills.all(), &tools.all()),
        Err(e) => {
            warn!(error = %e, "router cache unreadable, regenerating");
            RouterCacheManifest::generate(&skills.all(), &tools.all())
        }
    };
    if let Err(e) = manifest.save(&router_cache_path) {
        warn!(error = %e, "failed to persist router cache");
    }
    let router_cache = Arc::new(RwLock::new(manifest));

    let credentials = CredentialStore::load(&paths::credentials_file());
    let on_device = ModelClient::OnDeviceSmall(OnDeviceClient::new(
        config.routing.on_device_url.clone(),
        config.routing.on_device_model.clone().unwrap_or_else(|| "on-device".to_string()),
    ));
    let fast_cloud = build_cloud_client(&config, &credentials, &config.routing.fast_model);
    let strong_cloud = build_cloud_client(&config, &credentials, &config.routing.strong_model);

    let orchestrator = Arc::new(CoreOrchestrator::new(
        tools,
        skills,
        router_cache,
        router_cache_path,
        on_device,
        fast_cloud,
        strong_cloud,
        None,
        config.clone(),
        PriceTable::default(),
    ));

    match cli.cmd {
        Command::Run { request } => run_request(&orchestrator, &request).await,
        Command::Route { request } => route_request(&orchestrator, &request),
        Command::Tools { action } => tools_command(&orchestrator, action),
        Command::Skills { action } => skills_command(&orchestrator, action),
        Command::Scheduler { action } => scheduler_command(orchestrator, action).await?,
    }

    Ok(())
}

fn build_cloud_client(config: &Config, credentials: &CredentialStore, model_id: &str) -> ModelClient {
    let model_cfg = config.model_by_id(model_id);
    let base_url = model_cfg
        .and_then(|m| m.url.clone())
        .unwrap_or_else(|| DEFAULT_CLOUD_BASE_URL.to_string());
    let model_name = model_cfg.map(|m| m.model.clone()).unwrap_or_else(|| model_id.to_string());
    let configured_key = model_cfg.and_then(|m| m.api_key.as_deref());
    let api_key = resolve_api_key(model_id, configured_key, credentials);
    ModelClient::CloudFast(CloudModelClient::new(base_url, model_name, api_key))
}

async fn run_request(orchestrator: &CoreOrchestrator, request: &str) {
    let result = orchestrator.run(request, &tiered_core::agent_driver::NullProgressSink).await;
    if let Some(answer) = &result.answer {
        println!("{answer}");
    }
    if let Some(error) = &result.error {
        eprintln!("error: {error}");
    }
    eprintln!("{}", result.ledger_report);
}

fn route_request(orchestrator: &CoreOrchestrator, request: &str) {
    println!("{}", orchestrator.route_debug(request));
}

fn tools_command(orchestrator: &CoreOrchestrator, action: ToolsAction) {
    match action {
        ToolsAction::List => {
            for tool in orchestrator.tools().all() {
                println!("{:<20} {}", tool.name, tool.description);
            }
        }
    }
}

fn skills_command(orchestrator: &CoreOrchestrator, action: SkillsAction) {
    match action {
        SkillsAction::List => {
            for (name, description) in orchestrator.skills().summaries() {
                println!("{name:<24} {description}");
            }
        }
        SkillsAction::Search { query } => {
            for candidate in orchestrator.skills().search(&query) {
                println!("{:<24} {:.2}", candidate.name, candidate.score);
            }
        }
    }
}

async fn scheduler_command(orchestrator: Arc<CoreOrchestrator>, action: SchedulerAction) -> Result<()> {
    let store = Arc::new(TaskStore::boot(tiered_core::scheduler::task_store::default_store_path()));
    let scheduler = Scheduler::new(store, orchestrator, std::time::Duration::from_secs(tiered_core::scheduler::DEFAULT_TICK_SECS));
    match action {
        SchedulerAction::Tick => scheduler.tick(chrono::Utc::now()).await,
        SchedulerAction::Serve => scheduler.run_forever().await,
    }
    Ok(())
}
