//! Plugin registry: condition evaluators, action executors and guard
//! functions, keyed by name.
//!
//! The registry is an explicit value handed to the rule engine; tests build
//! their own instead of sharing a process-wide one.  Registering a key twice
//! replaces the earlier entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use actions::ActionExecutor;

use crate::conditions::{self, BasicEvaluator, ConditionEvaluator, RegexEvaluator, TimeEvaluator};
use crate::RuleError;

/// A named guard function: `exists(assignee)`, `not_empty(labels)`, …
///
/// Arguments arrive already resolved against the context.
pub type RuleFunction =
    Arc<dyn Fn(&[Value], &Map<String, Value>) -> Result<bool, RuleError> + Send + Sync>;

#[derive(Default)]
pub struct PluginRegistry {
    evaluators: RwLock<HashMap<String, Arc<dyn ConditionEvaluator>>>,
    executors: RwLock<HashMap<String, Arc<dyn ActionExecutor>>>,
    functions: RwLock<HashMap<String, RuleFunction>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("evaluators", &self.evaluators.read().keys().collect::<Vec<_>>())
            .field("executors", &self.executors.read().keys().collect::<Vec<_>>())
            .field("functions", &self.functions.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the basic, time and regex evaluators, every
    /// built-in executor, and the `exists` / `is_empty` / `not_empty`
    /// functions.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_condition_evaluator(Arc::new(BasicEvaluator));
        registry.register_condition_evaluator(Arc::new(TimeEvaluator));
        registry.register_condition_evaluator(Arc::new(RegexEvaluator::default()));

        for executor in actions::builtin::all() {
            registry.register_action_executor(executor);
        }

        registry.register_function("exists", |args: &[Value], _: &Map<String, Value>| {
            Ok(args.first().is_some_and(|v| !v.is_null()))
        });
        registry.register_function("is_empty", |args: &[Value], _: &Map<String, Value>| {
            Ok(conditions::is_empty(args.first()))
        });
        registry.register_function("not_empty", |args: &[Value], _: &Map<String, Value>| {
            Ok(!conditions::is_empty(args.first()))
        });
        registry
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn register_condition_evaluator(&self, evaluator: Arc<dyn ConditionEvaluator>) {
        let name = evaluator.condition_type().to_owned();
        if self.evaluators.write().insert(name.clone(), evaluator).is_some() {
            debug!(evaluator = %name, "replaced condition evaluator");
        }
    }

    pub fn register_action_executor(&self, executor: Arc<dyn ActionExecutor>) {
        let name = executor.action_type().to_owned();
        if self.executors.write().insert(name.clone(), executor).is_some() {
            debug!(executor = %name, "replaced action executor");
        }
    }

    pub fn register_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<bool, RuleError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self
            .functions
            .write()
            .insert(name.clone(), Arc::new(function))
            .is_some()
        {
            debug!(function = %name, "replaced rule function");
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn evaluator(&self, condition_type: &str) -> Option<Arc<dyn ConditionEvaluator>> {
        self.evaluators.read().get(condition_type).cloned()
    }

    pub fn executor(&self, action_type: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.read().get(action_type).cloned()
    }

    pub fn function(&self, name: &str) -> Option<RuleFunction> {
        self.functions.read().get(name).cloned()
    }

    pub fn has_executor(&self, action_type: &str) -> bool {
        self.executors.read().contains_key(action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actions::mock::MockExecutor;
    use serde_json::json;

    #[test]
    fn builtins_are_registered() {
        let registry = PluginRegistry::with_builtins();
        for name in ["basic", "time", "regex"] {
            assert!(registry.evaluator(name).is_some(), "missing evaluator {name}");
        }
        for name in ["task", "notification", "status", "git", "email"] {
            assert!(registry.has_executor(name), "missing executor {name}");
        }
        assert!(!registry.has_executor("manual"));

        let exists = registry.function("exists").unwrap();
        assert_eq!(exists(&[json!("alice")], &Map::new()), Ok(true));
        assert_eq!(exists(&[Value::Null], &Map::new()), Ok(false));
        let not_empty = registry.function("not_empty").unwrap();
        assert_eq!(not_empty(&[json!([])], &Map::new()), Ok(false));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let registry = PluginRegistry::with_builtins();
        let output = json!({ "custom": true }).as_object().cloned().unwrap();
        registry.register_action_executor(Arc::new(MockExecutor::returning("task", output)));
        assert!(registry.has_executor("task"));
        assert!(registry.executor("task").is_some());
    }

    #[test]
    fn empty_registry_has_nothing() {
        let registry = PluginRegistry::new();
        assert!(registry.evaluator("basic").is_none());
        assert!(registry.function("exists").is_none());
    }
}
