//! Workflow orchestrator.
//!
//! `WorkflowOrchestrator` owns every workflow instance:
//! 1. `create_workflow` validates the stage graph and allocates an instance.
//! 2. `execute_workflow` detaches a run onto the runtime.
//! 3. The run walks stages in topological order, creating one task per
//!    action; tasks with an executor run immediately (with retry), the rest
//!    wait for `complete_task`.
//! 4. Each stage ends when all its tasks are completed or skipped, fails on
//!    a failed task, and is bounded by the stage timeout.
//!
//! Lifecycle changes are published on the bus as `workflow.*` events.  The
//! instance map lock is never held while publishing, since bus handlers run
//! on the publisher's task and may call back into the orchestrator.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use actions::{ActionDefinition, ActionError, ActionOutput};
use events::{panic_message, Event, EventBus, WorkflowEvent, WILDCARD};

use crate::config::OrchestratorConfig;
use crate::dag::stage_order;
use crate::handlers::{TaskCompletionHandler, TransitionHandler};
use crate::models::{
    RetryPolicy, StageDefinition, TaskInstance, TaskStatus, WorkflowDefinition,
    WorkflowInstance, WorkflowStatus,
};
use crate::rules::{is_skipped, RuleEngine};
use crate::{EngineError, RuleError};

/// Event types published by the orchestrator.
pub mod topics {
    pub const CREATED: &str = "workflow.created";
    pub const STARTED: &str = "workflow.started";
    pub const STAGE_CHANGED: &str = "workflow.stage.changed";
    pub const TASK_CREATED: &str = "workflow.task.created";
    pub const TASK_ASSIGNMENT_REQUESTED: &str = "workflow.task.assignment_requested";
    pub const TASK_COMPLETED: &str = "workflow.task.completed";
    pub const COMPLETED: &str = "workflow.completed";
    pub const FAILED: &str = "workflow.failed";

    /// Prefix shared by every event above.
    pub const PREFIX: &str = "workflow.";
}

/// Action types that always wait for a human.
const HUMAN_ACTIONS: &[&str] = &["manual", "approval"];

// ---------------------------------------------------------------------------
// Reporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorMetrics {
    pub workflows_created: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    /// Non-terminal instances at the last collection.
    pub active_workflows: usize,
    /// Mean run time of finished instances.
    pub average_duration: Duration,
    pub collected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub total: usize,
    pub running: usize,
    /// Running instances older than the stall threshold.
    pub stalled: Vec<Uuid>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.stalled.is_empty()
    }
}

enum StageState {
    Pending,
    Done,
    Failed { task_id: String, message: String },
}

// ---------------------------------------------------------------------------
// WorkflowOrchestrator
// ---------------------------------------------------------------------------

pub struct WorkflowOrchestrator {
    config: OrchestratorConfig,
    bus: Arc<EventBus>,
    rules: Arc<RuleEngine>,
    workflows: RwLock<HashMap<Uuid, WorkflowInstance>>,
    /// Wakes the stage waiter of a running instance.
    signals: Mutex<HashMap<Uuid, Arc<Notify>>>,
    metrics: parking_lot::RwLock<OrchestratorMetrics>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowOrchestrator {
    /// Build an orchestrator and subscribe its bus handlers.
    pub fn new(config: OrchestratorConfig, bus: Arc<EventBus>, rules: Arc<RuleEngine>) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            config,
            bus: Arc::clone(&bus),
            rules,
            workflows: RwLock::new(HashMap::new()),
            signals: Mutex::new(HashMap::new()),
            metrics: parking_lot::RwLock::new(OrchestratorMetrics::default()),
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        });

        let completion = Arc::new(TaskCompletionHandler::new(Arc::downgrade(&orchestrator)));
        for event_type in TaskCompletionHandler::EVENT_TYPES {
            bus.subscribe(*event_type, completion.clone());
        }
        bus.subscribe(
            WILDCARD,
            Arc::new(TransitionHandler::new(Arc::downgrade(&orchestrator))),
        );

        orchestrator
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Validate `definition` and allocate a new instance in `created`.
    ///
    /// # Errors
    /// - [`EngineError::UnknownDependency`] / [`EngineError::CycleDetected`]
    /// - [`EngineError::ConcurrencyLimit`] once the engine-wide ceiling of
    ///   live instances is reached.
    /// - [`EngineError::DefinitionConcurrencyLimit`] once the definition's
    ///   own `max_concurrency` is reached.
    #[instrument(skip(self, definition), fields(workflow = %definition.name))]
    pub async fn create_workflow(&self, definition: WorkflowDefinition) -> Result<Uuid, EngineError> {
        let order = stage_order(&definition)?;

        let (id, name, version, first_stage) = {
            let mut workflows = self.workflows.write().await;

            let live = workflows.values().filter(|w| !w.status.is_terminal());
            let (total, same_definition) = live.fold((0, 0), |(total, same), w| {
                (total + 1, same + usize::from(w.definition.name == definition.name))
            });

            let limit = self.config.max_concurrent_workflows;
            if total >= limit {
                return Err(EngineError::ConcurrencyLimit { limit });
            }
            if let Some(limit) = definition.settings.max_concurrency {
                if same_definition >= limit {
                    return Err(EngineError::DefinitionConcurrencyLimit {
                        name: definition.name.clone(),
                        limit,
                    });
                }
            }

            let instance = WorkflowInstance::new(definition, order);
            let summary = (
                instance.id,
                instance.definition.name.clone(),
                instance.definition.version.clone(),
                instance.current_stage.clone(),
            );
            workflows.insert(instance.id, instance);
            summary
        };

        self.metrics.write().workflows_created += 1;
        info!(workflow_id = %id, "workflow created");

        self.emit(
            topics::CREATED,
            id,
            json!({ "name": name, "version": version, "current_stage": first_stage }),
        )
        .await;
        Ok(id)
    }

    /// Start a `created` instance on a background task and return at once.
    #[instrument(skip(self))]
    pub async fn execute_workflow(self: &Arc<Self>, workflow_id: Uuid) -> Result<(), EngineError> {
        {
            let mut workflows = self.workflows.write().await;
            let instance = workflows
                .get_mut(&workflow_id)
                .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
            if instance.status != WorkflowStatus::Created {
                return Err(EngineError::InvalidState {
                    workflow_id,
                    status: instance.status.to_string(),
                });
            }
            instance.status = WorkflowStatus::Running;
            instance.started_at = Some(Utc::now());
        }
        self.signals
            .lock()
            .insert(workflow_id, Arc::new(Notify::new()));

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_workflow(workflow_id).await });
        Ok(())
    }

    /// Record the outcome of a task finished outside the engine.
    ///
    /// A `result` on a completed task is folded into the instance context
    /// like an executor result.
    #[instrument(skip(self, result))]
    pub async fn complete_task(
        &self,
        workflow_id: Uuid,
        task_id: &str,
        status: TaskStatus,
        result: Option<Map<String, Value>>,
    ) -> Result<(), EngineError> {
        let (stage, progress) = {
            let mut workflows = self.workflows.write().await;
            let instance = workflows
                .get_mut(&workflow_id)
                .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
            let task = instance
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| EngineError::TaskNotFound {
                    workflow_id,
                    task_id: task_id.to_owned(),
                })?;

            task.status = status;
            task.updated_at = Utc::now();
            if status.is_done() {
                task.progress = 1.0;
            }
            if status == TaskStatus::Failed {
                task.error = result
                    .as_ref()
                    .and_then(|r| r.get("error"))
                    .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_owned))
                    .or_else(|| Some("task reported as failed".into()));
            }
            task.result = result.clone();
            let stage = task.stage.clone();
            let action_type = task.action_type.clone();

            // A finished instance keeps the progress and context it ended with.
            if !instance.status.is_terminal() {
                if status == TaskStatus::Completed {
                    if let Some(result) = &result {
                        instance.fold_result(&action_type, result);
                    }
                }
                recompute_progress(instance);
            }
            (stage, instance.progress)
        };

        info!(%status, "task completed externally");
        self.emit(
            topics::TASK_COMPLETED,
            workflow_id,
            json!({
                "task_id": task_id,
                "stage": stage,
                "status": status,
                "result": result,
                "progress": progress,
            }),
        )
        .await;
        self.wake(workflow_id);
        Ok(())
    }

    /// Run trigger and stage-condition rules of every running instance
    /// against `event`, executing the selected actions.
    ///
    /// Returns the number of actions executed.
    pub async fn apply_transitions(&self, event: &dyn Event) -> usize {
        let running: Vec<(Uuid, WorkflowDefinition, Map<String, Value>)> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.status == WorkflowStatus::Running)
            .map(|w| (w.id, w.definition.clone(), w.variables()))
            .collect();

        let mut executed = 0;
        for (id, definition, variables) in running {
            let selected = match self.rules.evaluate_transitions(&definition, &variables, event) {
                Ok(selected) => selected,
                Err(err) => {
                    warn!(workflow_id = %id, error = %err, "transition evaluation failed");
                    continue;
                }
            };

            let mut context = self.rules.build_context(&definition, &variables, event);
            context.insert("workflow_id".into(), Value::String(id.to_string()));

            for action in selected {
                match self.rules.execute_action(&action, &context).await {
                    Ok(output) => {
                        executed += 1;
                        if let Some(instance) = self.workflows.write().await.get_mut(&id) {
                            instance.fold_result(&action.action_type, &output);
                        }
                    }
                    Err(err) => warn!(
                        workflow_id = %id,
                        action = %action.action_type,
                        error = %err,
                        "transition action failed"
                    ),
                }
            }
        }
        executed
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowInstance, EngineError> {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or(EngineError::WorkflowNotFound(workflow_id))
    }

    /// Snapshots of every instance, oldest first.
    pub async fn list_workflows(&self) -> Vec<WorkflowInstance> {
        let mut all: Vec<WorkflowInstance> = self.workflows.read().await.values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        all
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        self.metrics.read().clone()
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn run_workflow(self: Arc<Self>, workflow_id: Uuid) {
        let snapshot = self
            .workflows
            .read()
            .await
            .get(&workflow_id)
            .map(|w| (w.definition.clone(), w.stage_order.clone()));
        let Some((definition, order)) = snapshot else {
            warn!(%workflow_id, "workflow disappeared before it could start");
            return;
        };

        info!(%workflow_id, workflow = %definition.name, stages = order.len(), "workflow started");
        self.emit(
            topics::STARTED,
            workflow_id,
            json!({ "name": definition.name, "stages": order }),
        )
        .await;

        let outcome = AssertUnwindSafe(self.run_stages(workflow_id, &definition, &order))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(EngineError::Panicked(panic_message(payload.as_ref()))));
        self.finish(workflow_id, outcome).await;
    }

    async fn run_stages(
        &self,
        workflow_id: Uuid,
        definition: &WorkflowDefinition,
        order: &[String],
    ) -> Result<(), EngineError> {
        for (index, name) in order.iter().enumerate() {
            let Some(stage) = definition.stages.get(name) else {
                continue;
            };

            let previous = {
                let mut workflows = self.workflows.write().await;
                let instance = workflows
                    .get_mut(&workflow_id)
                    .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
                instance.progress = index as f64 / order.len() as f64;
                instance.current_stage.replace(name.clone())
            };

            debug!(%workflow_id, stage = %name, "entering stage");
            self.emit(
                topics::STAGE_CHANGED,
                workflow_id,
                json!({ "stage": name, "previous_stage": previous, "index": index }),
            )
            .await;

            self.execute_stage(workflow_id, definition, stage).await?;
        }
        Ok(())
    }

    async fn execute_stage(
        &self,
        workflow_id: Uuid,
        definition: &WorkflowDefinition,
        stage: &StageDefinition,
    ) -> Result<(), EngineError> {
        for action in &stage.actions {
            let task = TaskInstance::new(&stage.name, action);
            let task_id = task.id.clone();
            let variables = {
                let mut workflows = self.workflows.write().await;
                let instance = workflows
                    .get_mut(&workflow_id)
                    .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
                instance.tasks.insert(task_id.clone(), task);
                instance.variables()
            };

            self.emit(
                topics::TASK_CREATED,
                workflow_id,
                json!({ "task_id": task_id, "stage": stage.name, "action_type": action.action_type }),
            )
            .await;

            if HUMAN_ACTIONS.contains(&action.action_type.as_str()) {
                self.emit(
                    topics::TASK_ASSIGNMENT_REQUESTED,
                    workflow_id,
                    json!({
                        "task_id": task_id,
                        "stage": stage.name,
                        "action_type": action.action_type,
                        "parameters": action.parameters,
                    }),
                )
                .await;
                continue;
            }
            if !self.rules.registry().has_executor(&action.action_type) {
                debug!(action = %action.action_type, %task_id, "no executor registered, task stays pending");
                continue;
            }

            self.update_task(workflow_id, &task_id, |task| task.status = TaskStatus::InProgress)
                .await;

            let mut context = variables;
            context.insert("workflow_id".into(), Value::String(workflow_id.to_string()));
            context.insert("stage".into(), Value::String(stage.name.clone()));
            context.insert("task_id".into(), Value::String(task_id.clone()));

            match self
                .execute_with_retry(action, &context, &definition.settings.retry_policy)
                .await
            {
                Ok(output) => {
                    let status = if is_skipped(&output) {
                        TaskStatus::Skipped
                    } else {
                        TaskStatus::Completed
                    };
                    {
                        let mut workflows = self.workflows.write().await;
                        if let Some(instance) = workflows.get_mut(&workflow_id) {
                            if let Some(task) = instance.tasks.get_mut(&task_id) {
                                task.status = status;
                                task.progress = 1.0;
                                task.result = Some(output.clone());
                                task.updated_at = Utc::now();
                            }
                            instance.fold_result(&action.action_type, &output);
                        }
                    }
                    self.emit(
                        topics::TASK_COMPLETED,
                        workflow_id,
                        json!({
                            "task_id": task_id,
                            "stage": stage.name,
                            "status": status,
                            "result": output,
                        }),
                    )
                    .await;
                }
                Err(err) => {
                    let message = err.to_string();
                    error!(%workflow_id, %task_id, error = %message, "task failed");
                    self.update_task(workflow_id, &task_id, |task| {
                        task.status = TaskStatus::Failed;
                        task.error = Some(message.clone());
                    })
                    .await;
                    return Err(EngineError::TaskFailed {
                        stage: stage.name.clone(),
                        task_id,
                        message,
                    });
                }
            }
        }

        let timeout = stage
            .timeout
            .or(definition.settings.default_timeout)
            .unwrap_or(self.config.default_stage_timeout);
        self.wait_for_stage_completion(workflow_id, &stage.name, timeout)
            .await
    }

    /// Run an action, retrying `Retryable` failures with exponential
    /// back-off.  Every other error fails immediately.
    async fn execute_with_retry(
        &self,
        action: &ActionDefinition,
        context: &Map<String, Value>,
        policy: &RetryPolicy,
    ) -> Result<ActionOutput, EngineError> {
        let mut attempts = 0u32;

        loop {
            match self.rules.execute_action(action, context).await {
                Ok(output) => return Ok(output),

                Err(RuleError::Action(ActionError::Retryable(message))) => {
                    attempts += 1;
                    if attempts > policy.max_retries {
                        return Err(EngineError::RetryExhausted {
                            action_type: action.action_type.clone(),
                            attempts,
                            message,
                        });
                    }

                    let delay = policy.delay_for(attempts);
                    warn!(
                        "action '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        action.action_type, attempts, policy.max_retries, delay, message
                    );
                    tokio::time::sleep(delay).await;
                }

                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Wait until every task of `stage` is completed or skipped.
    async fn wait_for_stage_completion(
        &self,
        workflow_id: Uuid,
        stage: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let signal = self.signal(workflow_id);

        let wait = async {
            loop {
                let notified = signal.notified();
                tokio::pin!(notified);
                // Register interest before checking so a completion between
                // the check and the await is not lost.
                notified.as_mut().enable();

                match self.stage_state(workflow_id, stage).await {
                    Ok(StageState::Pending) => notified.await,
                    Ok(StageState::Done) => return Ok(()),
                    Ok(StageState::Failed { task_id, message }) => {
                        return Err(EngineError::TaskFailed {
                            stage: stage.to_owned(),
                            task_id,
                            message,
                        })
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%workflow_id, stage, ?timeout, "stage timed out");
                Err(EngineError::StageTimeout {
                    stage: stage.to_owned(),
                    timeout,
                })
            }
        }
    }

    async fn stage_state(&self, workflow_id: Uuid, stage: &str) -> Result<StageState, EngineError> {
        let workflows = self.workflows.read().await;
        let instance = workflows
            .get(&workflow_id)
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        let mut all_done = true;
        for task in instance.stage_tasks(stage) {
            if task.status == TaskStatus::Failed {
                return Ok(StageState::Failed {
                    task_id: task.id.clone(),
                    message: task.error.clone().unwrap_or_else(|| "task failed".into()),
                });
            }
            all_done &= task.status.is_done();
        }
        Ok(if all_done {
            StageState::Done
        } else {
            StageState::Pending
        })
    }

    async fn finish(&self, workflow_id: Uuid, outcome: Result<(), EngineError>) {
        let error = outcome.err().map(|e| e.to_string());
        let status = if error.is_some() {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };

        let summary = {
            let mut workflows = self.workflows.write().await;
            workflows.get_mut(&workflow_id).map(|instance| {
                instance.status = status;
                instance.error = error.clone();
                instance.completed_at = Some(Utc::now());
                if status == WorkflowStatus::Completed {
                    instance.progress = 1.0;
                }
                let duration = instance
                    .duration()
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or_default();
                // Counted before the lock is released so readers never see a
                // terminal instance that the metrics do not.
                self.record_finished(status, duration);
                (
                    instance.definition.name.clone(),
                    instance.current_stage.clone(),
                    duration,
                )
            })
        };
        self.signals.lock().remove(&workflow_id);

        let Some((name, stage, duration)) = summary else {
            return;
        };

        match &error {
            None => info!(%workflow_id, workflow = %name, ?duration, "workflow completed"),
            Some(err) => {
                error!(%workflow_id, workflow = %name, error = %err, "workflow failed");
                self.emit(
                    topics::FAILED,
                    workflow_id,
                    json!({ "name": name, "stage": stage, "error": err }),
                )
                .await;
            }
        }

        self.emit(
            topics::COMPLETED,
            workflow_id,
            json!({
                "name": name,
                "status": status,
                "duration_ms": duration.as_millis() as u64,
                "error": error,
            }),
        )
        .await;
    }

    // -----------------------------------------------------------------------
    // Background maintenance
    // -----------------------------------------------------------------------

    /// Spawn the cleanup, monitor and metrics loops.  They run until
    /// [`WorkflowOrchestrator::shutdown`].
    pub fn start(self: &Arc<Self>) {
        self.spawn_periodic("cleanup", self.config.cleanup_interval, |o| async move {
            let removed = o.cleanup_expired().await;
            if removed > 0 {
                info!(removed, "expired workflows cleaned up");
            }
        });
        self.spawn_periodic("monitor", self.config.monitor_interval, |o| async move {
            let report = o.health_check().await;
            debug!(total = report.total, running = report.running, "workflow monitor");
            for id in &report.stalled {
                warn!(workflow_id = %id, "workflow has been running longer than the stall threshold");
            }
        });
        self.spawn_periodic("metrics", self.config.metrics_interval, |o| async move {
            o.collect_metrics().await;
        });
        info!("orchestrator background tasks started");
    }

    /// Stop background loops and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!("orchestrator shut down");
    }

    fn spawn_periodic<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let this = Arc::clone(self);
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick(Arc::clone(&this)).await,
                }
            }
            debug!(task = name, "background task stopped");
        });
        self.background.lock().push(handle);
    }

    /// Remove terminal instances that finished more than `retention` ago.
    pub async fn cleanup_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let now = Utc::now();

        let removed: Vec<Uuid> = {
            let mut workflows = self.workflows.write().await;
            let expired: Vec<Uuid> = workflows
                .values()
                .filter(|w| {
                    w.status.is_terminal()
                        && now - w.completed_at.unwrap_or(w.created_at) >= retention
                })
                .map(|w| w.id)
                .collect();
            for id in &expired {
                workflows.remove(id);
            }
            expired
        };

        let mut signals = self.signals.lock();
        for id in &removed {
            signals.remove(id);
        }
        removed.len()
    }

    pub async fn health_check(&self) -> HealthReport {
        let stall = chrono::Duration::from_std(self.config.stall_threshold)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let now = Utc::now();
        let workflows = self.workflows.read().await;

        let running: Vec<&WorkflowInstance> = workflows
            .values()
            .filter(|w| w.status == WorkflowStatus::Running)
            .collect();
        let stalled = running
            .iter()
            .filter(|w| w.started_at.is_some_and(|at| now - at > stall))
            .map(|w| w.id)
            .collect();

        HealthReport {
            total: workflows.len(),
            running: running.len(),
            stalled,
        }
    }

    /// Refresh the active count and collection time.
    pub async fn collect_metrics(&self) -> OrchestratorMetrics {
        let active = self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| !w.status.is_terminal())
            .count();

        let mut metrics = self.metrics.write();
        metrics.active_workflows = active;
        metrics.collected_at = Some(Utc::now());
        metrics.clone()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn emit(&self, event_type: &str, workflow_id: Uuid, data: Value) {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let event = WorkflowEvent::new(event_type, workflow_id, data).into_shared();
        match self.bus.publish(event).await {
            Ok(report) if !report.is_clean() => warn!(
                event_type,
                failures = report.failures.len(),
                "lifecycle event had handler failures"
            ),
            Ok(_) => {}
            Err(err) => debug!(event_type, error = %err, "lifecycle event not published"),
        }
    }

    async fn update_task(&self, workflow_id: Uuid, task_id: &str, apply: impl FnOnce(&mut TaskInstance)) {
        let mut workflows = self.workflows.write().await;
        if let Some(task) = workflows
            .get_mut(&workflow_id)
            .and_then(|w| w.tasks.get_mut(task_id))
        {
            apply(task);
            task.updated_at = Utc::now();
        }
    }

    fn signal(&self, workflow_id: Uuid) -> Arc<Notify> {
        Arc::clone(self.signals.lock().entry(workflow_id).or_default())
    }

    fn wake(&self, workflow_id: Uuid) {
        if let Some(signal) = self.signals.lock().get(&workflow_id) {
            signal.notify_waiters();
        }
    }

    fn record_finished(&self, status: WorkflowStatus, duration: Duration) {
        let mut metrics = self.metrics.write();
        match status {
            WorkflowStatus::Failed => metrics.workflows_failed += 1,
            _ => metrics.workflows_completed += 1,
        }
        let finished = metrics.workflows_completed + metrics.workflows_failed;
        let mean = metrics.average_duration.as_secs_f64();
        let next = mean + (duration.as_secs_f64() - mean) / finished as f64;
        metrics.average_duration = Duration::from_secs_f64(next.max(0.0));
    }
}

/// Progress = finished stages plus the done fraction of the current one.
fn recompute_progress(instance: &mut WorkflowInstance) {
    let total = instance.stage_order.len();
    if total == 0 {
        return;
    }
    let Some(current) = instance.current_stage.as_deref() else {
        return;
    };
    let Some(index) = instance.stage_order.iter().position(|s| s == current) else {
        return;
    };

    let (done, count) = instance
        .stage_tasks(current)
        .fold((0usize, 0usize), |(done, count), t| {
            (done + usize::from(t.status.is_done()), count + 1)
        });
    let fraction = if count == 0 { 0.0 } else { done as f64 / count as f64 };
    instance.progress = (index as f64 + fraction) / total as f64;
}
