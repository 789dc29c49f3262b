//! Core domain models for the workflow engine.
//!
//! Definitions (`WorkflowDefinition` and friends) arrive fully validated
//! from an external loader; they derive serde so collaborators can hand
//! them over as JSON.  Instances (`WorkflowInstance`, `TaskInstance`) are
//! owned and mutated exclusively by the orchestrator.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use actions::ActionDefinition;

use crate::durations;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Maps an incoming event to named actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Exact event type, or `"*"` for every event.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Dot path → expected value; all must match (deep equality).
    #[serde(default)]
    pub conditions: Map<String, Value>,
    /// Action types to run, resolved against the stages' action lists.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl TriggerDefinition {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            conditions: Map::new(),
            actions: Vec::new(),
        }
    }

    pub fn when(mut self, path: impl Into<String>, expected: impl Into<Value>) -> Self {
        self.conditions.insert(path.into(), expected.into());
        self
    }

    pub fn run(mut self, action_type: impl Into<String>) -> Self {
        self.actions.push(action_type.into());
        self
    }
}

// ---------------------------------------------------------------------------
// ConditionDefinition
// ---------------------------------------------------------------------------

/// A `field operator value` test against an evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    /// Dot-separated path into the context (`event.data.status`).
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

impl ConditionDefinition {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// StageDefinition
// ---------------------------------------------------------------------------

/// A named phase of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    /// Stages that must complete before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Evaluated independently; each true condition enqueues `actions`.
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
    #[serde(default, with = "durations::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            timeout: None,
        }
    }

    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        self.dependencies.push(stage.into());
        self
    }

    pub fn with_condition(mut self, condition: ConditionDefinition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: ActionDefinition) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Bounded exponential back-off applied to `Retryable` action failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "durations")]
    pub initial_delay: Duration,
    #[serde(with = "durations")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

/// Per-definition tuning knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Cap on live instances of this definition (on top of the engine-wide
    /// limit).  `None` means only the engine-wide limit applies.
    pub max_concurrency: Option<usize>,
    /// Stage timeout used when a stage does not set its own.
    #[serde(with = "durations::option", skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
    /// Informational; carried in lifecycle events for collaborators.
    pub log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete, validated workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
    /// Keyed by stage name; execution order comes from the dependency graph.
    #[serde(default)]
    pub stages: BTreeMap<String, StageDefinition>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

fn default_version() -> String {
    "1.0".into()
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            triggers: Vec::new(),
            stages: BTreeMap::new(),
            variables: Map::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn with_stage(mut self, stage: StageDefinition) -> Self {
        self.stages.insert(stage.name.clone(), stage);
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerDefinition) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow instance.
///
/// `created → running → {completed | failed}`; `paused` and `cancelled` are
/// reserved for collaborators and never entered by the orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Completed or skipped; counts towards stage completion.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "open" => Ok(Self::Pending),
            "in_progress" | "running" => Ok(Self::InProgress),
            "completed" | "done" | "closed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// One unit of work created for an action inside a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: String,
    pub stage: String,
    pub action_type: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub context: Map<String, Value>,
    pub progress: f64,
    pub result: Option<Map<String, Value>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskInstance {
    pub fn new(stage: &str, action: &ActionDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{}-{}", action.action_type, Uuid::new_v4().simple()),
            stage: stage.to_owned(),
            action_type: action.action_type.clone(),
            status: TaskStatus::Pending,
            assignee: None,
            context: action.parameters.clone(),
            progress: 0.0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One running execution of a `WorkflowDefinition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
    pub current_stage: Option<String>,
    /// Topological stage order, computed once at creation.
    pub stage_order: Vec<String>,
    /// Mutable scratch space; action results land under `results`.
    pub context: Map<String, Value>,
    pub tasks: HashMap<String, TaskInstance>,
    /// 0.0–1.0, by completed stages.
    pub progress: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(definition: WorkflowDefinition, stage_order: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            current_stage: stage_order.first().cloned(),
            definition,
            status: WorkflowStatus::Created,
            stage_order,
            context: Map::new(),
            tasks: HashMap::new(),
            progress: 0.0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn stage_tasks<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a TaskInstance> + 'a {
        self.tasks.values().filter(move |task| task.stage == stage)
    }

    /// Variables merged with the instance context; the context wins.
    pub fn variables(&self) -> Map<String, Value> {
        let mut merged = self.definition.variables.clone();
        merged.extend(self.context.clone());
        merged
    }

    /// Store an action result under `context.results.<action_type>`.
    pub fn fold_result(&mut self, action_type: &str, output: &Map<String, Value>) {
        let results = self
            .context
            .entry("results")
            .or_insert_with(|| Value::Object(Map::new()));
        if !results.is_object() {
            *results = Value::Object(Map::new());
        }
        if let Value::Object(results) = results {
            results.insert(action_type.to_owned(), Value::Object(output.clone()));
        }
    }

    /// Wall-clock run time, if the instance has started.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Utc::now) - started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn definition_deserializes_with_defaults() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "name": "review",
            "stages": {
                "review": {
                    "name": "review",
                    "timeout": "90s",
                    "actions": [{ "type": "notification", "parameters": { "message": "hi" } }]
                }
            },
            "settings": { "default_timeout": 600 }
        }))
        .unwrap();

        assert_eq!(definition.version, "1.0");
        let stage = &definition.stages["review"];
        assert_eq!(stage.timeout, Some(Duration::from_secs(90)));
        assert_eq!(stage.actions[0].action_type, "notification");
        assert_eq!(definition.settings.default_timeout, Some(Duration::from_secs(600)));
        assert_eq!(definition.settings.retry_policy.max_retries, 3);
    }

    #[test]
    fn fold_result_nests_under_results() {
        let mut instance = WorkflowInstance::new(WorkflowDefinition::new("wf"), vec![]);
        let output = json!({ "task_id": "t-1" }).as_object().cloned().unwrap();
        instance.fold_result("task", &output);
        assert_eq!(instance.context["results"]["task"]["task_id"], "t-1");
    }

    #[test]
    fn instance_variables_prefer_context() {
        let definition = WorkflowDefinition::new("wf")
            .with_variable("env", "staging")
            .with_variable("team", "core");
        let mut instance = WorkflowInstance::new(definition, vec![]);
        instance.context.insert("env".into(), json!("prod"));

        let vars = instance.variables();
        assert_eq!(vars["env"], "prod");
        assert_eq!(vars["team"], "core");
    }

    #[test]
    fn task_status_parses_provider_aliases() {
        assert_eq!("done".parse::<TaskStatus>(), Ok(TaskStatus::Completed));
        assert_eq!("skipped".parse::<TaskStatus>(), Ok(TaskStatus::Skipped));
        assert!("archived".parse::<TaskStatus>().is_err());
    }
}
