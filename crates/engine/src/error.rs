//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use actions::ActionError;
use events::BusError;

/// Errors produced by condition evaluation and action dispatch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleError {
    // ------ Lookup errors ------

    #[error("no condition evaluator registered for '{0}'")]
    NoEvaluator(String),

    #[error("no action executor registered for '{0}'")]
    NoExecutor(String),

    #[error("unknown rule function '{0}'")]
    UnknownFunction(String),

    // ------ Validation errors ------

    #[error("{evaluator} evaluator does not support operator '{operator}'")]
    UnknownOperator { evaluator: String, operator: String },

    /// An operand of a numeric comparison could not be coerced to `f64`.
    #[error("operator '{operator}' needs numeric operands, got {value}")]
    NotNumeric { operator: String, value: String },

    #[error("cannot parse '{0}' as a timestamp")]
    InvalidTime(String),

    #[error("cannot parse '{0}' as a duration")]
    InvalidDuration(String),

    #[error("invalid regular expression '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid condition expression '{0}'")]
    InvalidExpression(String),

    // ------ Execution errors ------

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Errors produced by the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Definition errors ------

    /// A stage lists a dependency that is not a stage of the workflow.
    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    /// Topological sort detected a cycle.
    #[error("stage dependency graph contains a cycle")]
    CycleDetected,

    // ------ Lookup errors ------

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("task '{task_id}' not found in workflow {workflow_id}")]
    TaskNotFound { workflow_id: Uuid, task_id: String },

    // ------ Lifecycle errors ------

    /// The engine-wide ceiling on live instances has been reached.
    #[error("maximum concurrent workflows reached ({limit})")]
    ConcurrencyLimit { limit: usize },

    /// The definition's own `max_concurrency` has been reached.
    #[error("maximum concurrent instances of '{name}' reached ({limit})")]
    DefinitionConcurrencyLimit { name: String, limit: usize },

    #[error("workflow {workflow_id} cannot start from status '{status}'")]
    InvalidState { workflow_id: Uuid, status: String },

    // ------ Execution errors ------

    #[error("stage '{stage}' timed out after {timeout:?}")]
    StageTimeout { stage: String, timeout: Duration },

    #[error("task '{task_id}' in stage '{stage}' failed: {message}")]
    TaskFailed {
        stage: String,
        task_id: String,
        message: String,
    },

    /// A `Retryable` action error persisted past the retry policy.
    #[error("action '{action_type}' exceeded retry limit after {attempts} attempt(s): {message}")]
    RetryExhausted {
        action_type: String,
        attempts: u32,
        message: String,
    },

    /// The run itself panicked; the instance is failed instead of left running.
    #[error("workflow run panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Bus(#[from] BusError),
}
