//! `MockExecutor`: a test double for `ActionExecutor`.
//!
//! Useful in unit and integration tests where a real executor is either
//! unavailable or irrelevant.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::{ActionContext, ActionDefinition, ActionError, ActionExecutor, ActionOutput};

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    /// Return a specific result map.
    Return(ActionOutput),
    /// Fail with a `Retryable` error the first `failures` calls, then return.
    Flaky { failures: usize, output: ActionOutput },
    /// Always fail with a `Retryable` error.
    FailRetryable(String),
    /// Always fail with a `Fatal` error.
    FailFatal(String),
}

/// A mock executor that records every call it receives and returns a
/// programmer-specified result.
pub struct MockExecutor {
    action_type: String,
    behaviour: MockBehaviour,
    /// Parameters seen by this executor (in call order).
    pub calls: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl MockExecutor {
    fn with_behaviour(action_type: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            action_type: action_type.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given result.
    pub fn returning(action_type: impl Into<String>, output: ActionOutput) -> Self {
        Self::with_behaviour(action_type, MockBehaviour::Return(output))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(action_type: impl Into<String>, failures: usize, output: ActionOutput) -> Self {
        Self::with_behaviour(action_type, MockBehaviour::Flaky { failures, output })
    }

    pub fn failing_retryable(action_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(action_type, MockBehaviour::FailRetryable(msg.into()))
    }

    pub fn failing_fatal(action_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(action_type, MockBehaviour::FailFatal(msg.into()))
    }

    /// Number of times this executor has run.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn execute(
        &self,
        action: &ActionDefinition,
        _context: &ActionContext,
    ) -> Result<ActionOutput, ActionError> {
        let attempt = {
            let mut calls = self.calls.lock();
            calls.push(action.parameters.clone());
            calls.len()
        };

        match &self.behaviour {
            MockBehaviour::Return(output) => Ok(output.clone()),
            MockBehaviour::Flaky { failures, output } => {
                if attempt <= *failures {
                    Err(ActionError::Retryable(format!("attempt {attempt} failed")))
                } else {
                    Ok(output.clone())
                }
            }
            MockBehaviour::FailRetryable(msg) => Err(ActionError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(ActionError::Fatal(msg.clone())),
        }
    }
}
