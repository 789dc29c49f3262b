//! The `ActionExecutor` trait and the `ActionDefinition` it consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ActionError;

/// Context map handed to an executor (workflow variables, instance context,
/// the triggering event, …).
pub type ActionContext = Map<String, Value>;

/// Result map produced by an executor.
pub type ActionOutput = Map<String, Value>;

/// A typed, parameterised unit of work inside a stage.
///
/// Defined here (in the actions crate) so both the engine and executor
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Dispatch key into the executor registry.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Executor-specific parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Optional guard expression, e.g. `priority eq high` or `exists(assignee)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl ActionDefinition {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            parameters: Map::new(),
            condition: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// The core executor trait.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// The `ActionDefinition::action_type` this executor serves.
    fn action_type(&self) -> &str;

    /// Run the action and return a result map describing what happened.
    async fn execute(
        &self,
        action: &ActionDefinition,
        context: &ActionContext,
    ) -> Result<ActionOutput, ActionError>;
}
