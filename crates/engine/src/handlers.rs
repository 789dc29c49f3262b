//! Bus handlers that feed external events back into the orchestrator.
//!
//! Both hold a `Weak` reference so the bus does not keep a dropped
//! orchestrator alive.

use std::sync::Weak;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use events::{EventHandler, SharedEvent};

use crate::models::TaskStatus;
use crate::orchestrator::{topics, WorkflowOrchestrator};

// ---------------------------------------------------------------------------
// TaskCompletionHandler
// ---------------------------------------------------------------------------

/// Routes `task.completed` / `task.updated` events carrying `workflow_id`,
/// `task_id` and `status` to [`WorkflowOrchestrator::complete_task`].
///
/// `status` defaults to `completed` for `task.completed`; a `task.updated`
/// without a status is ignored.
pub struct TaskCompletionHandler {
    orchestrator: Weak<WorkflowOrchestrator>,
}

impl TaskCompletionHandler {
    pub const EVENT_TYPES: &'static [&'static str] = &["task.completed", "task.updated"];

    pub fn new(orchestrator: Weak<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl EventHandler for TaskCompletionHandler {
    fn name(&self) -> &str {
        "workflow-task-completion"
    }

    fn can_handle(&self, event_type: &str) -> bool {
        Self::EVENT_TYPES.contains(&event_type)
    }

    async fn handle(&self, event: SharedEvent) -> anyhow::Result<()> {
        let Some(orchestrator) = self.orchestrator.upgrade() else {
            return Ok(());
        };
        let data = event.data();

        let Some(workflow_id) = data.get("workflow_id").and_then(Value::as_str) else {
            debug!(event_type = event.event_type(), "task event without workflow_id, ignoring");
            return Ok(());
        };
        let workflow_id: Uuid = workflow_id
            .parse()
            .with_context(|| format!("invalid workflow_id '{workflow_id}'"))?;

        let task_id = data
            .get("task_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("task event for workflow {workflow_id} has no task_id"))?;

        let status = match data.get("status").and_then(Value::as_str) {
            Some(raw) => raw.parse::<TaskStatus>().map_err(|e| anyhow!(e))?,
            None if event.event_type() == "task.completed" => TaskStatus::Completed,
            None => return Ok(()),
        };

        let result = data.get("result").and_then(Value::as_object).cloned();
        orchestrator
            .complete_task(workflow_id, task_id, status, result)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TransitionHandler
// ---------------------------------------------------------------------------

/// Wildcard handler that runs rule transitions for every running workflow.
/// The orchestrator's own `workflow.*` events are skipped.
pub struct TransitionHandler {
    orchestrator: Weak<WorkflowOrchestrator>,
}

impl TransitionHandler {
    pub fn new(orchestrator: Weak<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl EventHandler for TransitionHandler {
    fn name(&self) -> &str {
        "workflow-transitions"
    }

    fn can_handle(&self, event_type: &str) -> bool {
        !event_type.starts_with(topics::PREFIX)
    }

    async fn handle(&self, event: SharedEvent) -> anyhow::Result<()> {
        if let Some(orchestrator) = self.orchestrator.upgrade() {
            let executed = orchestrator.apply_transitions(event.as_ref()).await;
            if executed > 0 {
                debug!(event_type = event.event_type(), executed, "transition actions executed");
            }
        }
        Ok(())
    }
}
