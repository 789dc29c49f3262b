//! `autoflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a workflow definition JSON file and print its stage order.
//! - `run`: execute a workflow definition in process with the built-in executors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use engine::orchestrator::topics;
use engine::{
    stage_order, OrchestratorConfig, PluginRegistry, RuleEngine, TaskStatus, WorkflowDefinition,
    WorkflowOrchestrator, WorkflowStatus,
};
use events::{EventBus, LoggingMiddleware, SharedEvent, WILDCARD};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "autoflow", about = "Event-driven workflow automation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow definition until it completes or fails.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Complete tasks that have no executor (manual, approval, …) as
        /// soon as they are created.
        #[arg(long)]
        auto_complete: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let definition = load_definition(&path)?;
            match stage_order(&definition) {
                Ok(order) => {
                    println!("✅ Workflow '{}' is valid. Stage order: {order:?}", definition.name);
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run { path, auto_complete } => {
            let definition = load_definition(&path)?;
            let status = run(definition, auto_complete).await?;
            if status != WorkflowStatus::Completed {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn run(definition: WorkflowDefinition, auto_complete: bool) -> anyhow::Result<WorkflowStatus> {
    let config = OrchestratorConfig::from_env().context("invalid AUTOFLOW_* configuration")?;
    let bus = Arc::new(EventBus::new());
    bus.add_middleware(Arc::new(LoggingMiddleware));
    let registry = Arc::new(PluginRegistry::with_builtins());
    let rules = Arc::new(RuleEngine::new(Arc::clone(&registry)));

    let orchestrator = WorkflowOrchestrator::new(config, Arc::clone(&bus), rules);
    orchestrator.start();

    let (tx, mut rx) = mpsc::channel::<SharedEvent>(256);
    bus.subscribe_channel(WILDCARD, tx);

    let id = orchestrator.create_workflow(definition).await?;
    orchestrator.execute_workflow(id).await?;
    info!(workflow_id = %id, "workflow started");

    wait_until_finished(&orchestrator, &registry, id, &mut rx, auto_complete).await?;

    let instance = orchestrator.get_workflow_status(id).await?;
    println!("{}", serde_json::to_string_pretty(&instance)?);
    orchestrator.shutdown().await;

    if instance.status == WorkflowStatus::Failed {
        bail!(
            "workflow failed: {}",
            instance.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(instance.status)
}

/// Follow the run's events until it finishes.
///
/// The channel drops events when full, so the instance status is also
/// polled in case `workflow.completed` never arrives.
async fn wait_until_finished(
    orchestrator: &WorkflowOrchestrator,
    registry: &PluginRegistry,
    id: Uuid,
    rx: &mut mpsc::Receiver<SharedEvent>,
    auto_complete: bool,
) -> anyhow::Result<()> {
    let mut poll = tokio::time::interval(STATUS_POLL_INTERVAL);
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { return Ok(()) };
                if handle_event(orchestrator, registry, id, &event, auto_complete).await {
                    return Ok(());
                }
            }
            _ = poll.tick() => {
                if orchestrator.get_workflow_status(id).await?.status.is_terminal() {
                    return Ok(());
                }
            }
        }
    }
}

/// React to one bus event of the run. Returns true once the workflow finished.
async fn handle_event(
    orchestrator: &WorkflowOrchestrator,
    registry: &PluginRegistry,
    id: Uuid,
    event: &SharedEvent,
    auto_complete: bool,
) -> bool {
    let data = event.data();
    if data.get("workflow_id").and_then(|v| v.as_str()) != Some(id.to_string().as_str()) {
        return false;
    }

    match event.event_type() {
        topics::TASK_CREATED if auto_complete => {
            let action_type = data.get("action_type").and_then(|v| v.as_str()).unwrap_or_default();
            if !registry.has_executor(action_type) {
                if let Some(task_id) = data.get("task_id").and_then(|v| v.as_str()) {
                    debug!(%task_id, action_type, "auto-completing task");
                    complete(orchestrator, id, task_id).await;
                }
            }
            false
        }
        topics::TASK_ASSIGNMENT_REQUESTED if !auto_complete => {
            warn!("task needs a human; rerun with --auto-complete to complete it automatically");
            false
        }
        topics::COMPLETED => true,
        _ => false,
    }
}

async fn complete(orchestrator: &WorkflowOrchestrator, id: Uuid, task_id: &str) {
    if let Err(e) = orchestrator
        .complete_task(id, task_id, TaskStatus::Completed, None)
        .await
    {
        warn!(%task_id, error = %e, "could not auto-complete task");
    }
}
