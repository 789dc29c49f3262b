//! Rule engine.
//!
//! `RuleEngine` turns an incoming event into the list of actions a workflow
//! should run (trigger and stage-condition matching), and dispatches single
//! actions to their executors behind an optional guard expression.  All
//! lookups go through the injected [`PluginRegistry`].

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use actions::{ActionDefinition, ActionExecutor, ActionOutput};
use events::event::event_to_value;
use events::Event;

use crate::conditions::{evaluator_for_operator, lookup, values_equal, ConditionEvaluator};
use crate::expression::{self, Expression};
use crate::models::{ConditionDefinition, WorkflowDefinition};
use crate::registry::PluginRegistry;
use crate::RuleError;

#[derive(Debug, Clone)]
pub struct RuleEngine {
    registry: Arc<PluginRegistry>,
}

impl RuleEngine {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Registration (delegates to the registry)
    // -----------------------------------------------------------------------

    pub fn register_condition_evaluator(&self, evaluator: Arc<dyn ConditionEvaluator>) {
        self.registry.register_condition_evaluator(evaluator);
    }

    pub fn register_action_executor(&self, executor: Arc<dyn ActionExecutor>) {
        self.registry.register_action_executor(executor);
    }

    pub fn register_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<bool, RuleError> + Send + Sync + 'static,
    {
        self.registry.register_function(name, function);
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Evaluation context for `event` against `definition`.
    ///
    /// Keys: `event`, `workflow`, `timestamp`, then the definition's
    /// variables and finally `variables`, each layer overriding the last.
    pub fn build_context(
        &self,
        definition: &WorkflowDefinition,
        variables: &Map<String, Value>,
        event: &dyn Event,
    ) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("event".into(), event_to_value(event));
        context.insert(
            "workflow".into(),
            json!({
                "name": definition.name,
                "version": definition.version,
                "description": definition.description,
            }),
        );
        context.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        context.extend(definition.variables.clone());
        context.extend(variables.clone());
        context
    }

    /// Actions `definition` wants to run in response to `event`.
    ///
    /// Trigger-selected actions come first, then the action lists of every
    /// stage condition that holds.  Duplicates are kept.
    pub fn evaluate_transitions(
        &self,
        definition: &WorkflowDefinition,
        variables: &Map<String, Value>,
        event: &dyn Event,
    ) -> Result<Vec<ActionDefinition>, RuleError> {
        let context = self.build_context(definition, variables, event);
        let mut selected = Vec::new();

        for trigger in &definition.triggers {
            if trigger.event_type != event.event_type() && trigger.event_type != events::WILDCARD {
                continue;
            }
            let matched = trigger.conditions.iter().all(|(path, expected)| {
                lookup(&context, path).is_some_and(|actual| values_equal(actual, expected))
            });
            if !matched {
                continue;
            }

            for name in &trigger.actions {
                match find_action(definition, name) {
                    Some(action) => selected.push(action.clone()),
                    None => warn!(
                        workflow = %definition.name,
                        action = %name,
                        "trigger names an action no stage defines"
                    ),
                }
            }
        }

        for stage in definition.stages.values() {
            for condition in &stage.conditions {
                match self.evaluate_condition(condition, &context) {
                    Ok(true) => selected.extend(stage.actions.iter().cloned()),
                    Ok(false) => {}
                    Err(err) => warn!(
                        stage = %stage.name,
                        field = %condition.field,
                        operator = %condition.operator,
                        error = %err,
                        "stage condition failed to evaluate"
                    ),
                }
            }
        }

        debug!(
            workflow = %definition.name,
            event_type = %event.event_type(),
            actions = selected.len(),
            "transitions evaluated"
        );
        Ok(selected)
    }

    // -----------------------------------------------------------------------
    // Conditions and guards
    // -----------------------------------------------------------------------

    pub fn evaluate_condition(
        &self,
        condition: &ConditionDefinition,
        context: &Map<String, Value>,
    ) -> Result<bool, RuleError> {
        let family = evaluator_for_operator(&condition.operator);
        let evaluator = self
            .registry
            .evaluator(family)
            .ok_or_else(|| RuleError::NoEvaluator(family.into()))?;
        evaluator.evaluate(condition, context)
    }

    /// Evaluate a guard expression (`priority eq high`, `exists(assignee)`).
    pub fn evaluate_guard(
        &self,
        guard: &str,
        context: &Map<String, Value>,
    ) -> Result<bool, RuleError> {
        match expression::parse(guard)? {
            Expression::Comparison(condition) => self.evaluate_condition(&condition, context),
            Expression::Call { name, args } => {
                let function = self
                    .registry
                    .function(&name)
                    .ok_or_else(|| RuleError::UnknownFunction(name.clone()))?;
                let args: Vec<Value> = args.iter().map(|arg| arg.resolve(context)).collect();
                function(&args, context)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run `action` with its executor.
    ///
    /// A guard that evaluates to false short-circuits with
    /// `{"skipped": true}` and the executor is never called.
    pub async fn execute_action(
        &self,
        action: &ActionDefinition,
        context: &Map<String, Value>,
    ) -> Result<ActionOutput, RuleError> {
        let executor = self
            .registry
            .executor(&action.action_type)
            .ok_or_else(|| RuleError::NoExecutor(action.action_type.clone()))?;

        if let Some(guard) = action.condition.as_deref().filter(|g| !g.trim().is_empty()) {
            if !self.evaluate_guard(guard, context)? {
                debug!(action = %action.action_type, guard, "guard is false, skipping action");
                let mut skipped = ActionOutput::new();
                skipped.insert("skipped".into(), Value::Bool(true));
                return Ok(skipped);
            }
        }

        Ok(executor.execute(action, context).await?)
    }
}

/// First action of type `action_type`, scanning stages in name order.
fn find_action<'a>(definition: &'a WorkflowDefinition, action_type: &str) -> Option<&'a ActionDefinition> {
    definition
        .stages
        .values()
        .flat_map(|stage| stage.actions.iter())
        .find(|action| action.action_type == action_type)
}

/// True when an executor output reports a skipped action.
pub fn is_skipped(output: &ActionOutput) -> bool {
    output.get("skipped").and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actions::mock::MockExecutor;
    use events::GenericEvent;
    use serde_json::json;

    use crate::models::{StageDefinition, TriggerDefinition};

    fn engine() -> RuleEngine {
        RuleEngine::new(Arc::new(PluginRegistry::with_builtins()))
    }

    fn output(value: Value) -> ActionOutput {
        value.as_object().cloned().unwrap()
    }

    fn review_workflow() -> WorkflowDefinition {
        WorkflowDefinition::new("review")
            .with_variable("team", "core")
            .with_stage(
                StageDefinition::new("notify")
                    .with_action(ActionDefinition::new("notification").with_param("message", "hi")),
            )
            .with_stage(
                StageDefinition::new("triage")
                    .with_condition(ConditionDefinition::new("event.data.priority", "eq", "high"))
                    .with_action(ActionDefinition::new("task").with_param("title", "Triage")),
            )
            .with_trigger(
                TriggerDefinition::new("task.created")
                    .when("event.data.project", "core")
                    .run("notification")
                    .run("unknown"),
            )
    }

    #[test]
    fn context_layers_override_in_order() {
        let engine = engine();
        let event = GenericEvent::new("task.created", "jira");
        let definition = review_workflow();
        let mut vars = Map::new();
        vars.insert("team".into(), json!("platform"));

        let ctx = engine.build_context(&definition, &vars, &event);
        assert_eq!(ctx["event"]["type"], "task.created");
        assert_eq!(ctx["workflow"]["name"], "review");
        assert_eq!(ctx["team"], "platform");
        assert!(ctx["timestamp"].is_string());
    }

    #[test]
    fn triggers_and_stage_conditions_select_actions() {
        let engine = engine();
        let event = GenericEvent::new("task.created", "jira")
            .with("project", "core")
            .with("priority", "high");

        let selected = engine
            .evaluate_transitions(&review_workflow(), &Map::new(), &event)
            .unwrap();
        let types: Vec<_> = selected.iter().map(|a| a.action_type.as_str()).collect();
        assert_eq!(types, vec!["notification", "task"]);
    }

    #[test]
    fn trigger_conditions_must_all_match() {
        let engine = engine();
        let event = GenericEvent::new("task.created", "jira").with("project", "other");
        let selected = engine
            .evaluate_transitions(&review_workflow(), &Map::new(), &event)
            .unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn wildcard_trigger_matches_any_event() {
        let engine = engine();
        let definition = review_workflow().with_trigger(TriggerDefinition::new("*").run("task"));
        let event = GenericEvent::new("git.push", "git");
        let selected = engine.evaluate_transitions(&definition, &Map::new(), &event).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].action_type, "task");
    }

    #[test]
    fn broken_stage_condition_is_treated_as_no_match() {
        let engine = engine();
        let definition = WorkflowDefinition::new("wf").with_stage(
            StageDefinition::new("s")
                .with_condition(ConditionDefinition::new("event.data.size", "gt", "large"))
                .with_action(ActionDefinition::new("task")),
        );
        let event = GenericEvent::new("x", "y").with("size", 3);
        assert!(engine
            .evaluate_transitions(&definition, &Map::new(), &event)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn condition_routing_by_operator() {
        let engine = engine();
        let ctx = output(json!({ "branch": "feature/x", "progress": 75 }));
        assert_eq!(
            engine.evaluate_condition(&ConditionDefinition::new("branch", "matches", "^feature/"), &ctx),
            Ok(true)
        );
        assert_eq!(
            engine.evaluate_condition(&ConditionDefinition::new("progress", "gte", 50), &ctx),
            Ok(true)
        );

        let bare = RuleEngine::new(Arc::new(PluginRegistry::new()));
        assert_eq!(
            bare.evaluate_condition(&ConditionDefinition::new("progress", "gte", 50), &ctx),
            Err(RuleError::NoEvaluator("basic".into()))
        );
    }

    #[test]
    fn guards_support_calls_and_custom_functions() {
        let engine = engine();
        engine.register_function("is_admin", |args: &[Value], _: &Map<String, Value>| {
            Ok(args.first() == Some(&json!("root")))
        });
        let ctx = output(json!({ "assignee": "alice", "user": "root" }));

        assert_eq!(engine.evaluate_guard("exists(assignee)", &ctx), Ok(true));
        assert_eq!(engine.evaluate_guard("exists(reviewer)", &ctx), Ok(false));
        assert_eq!(engine.evaluate_guard("is_admin(user)", &ctx), Ok(true));
        assert_eq!(
            engine.evaluate_guard("nope(user)", &ctx),
            Err(RuleError::UnknownFunction("nope".into()))
        );
    }

    #[test]
    fn comparison_guards_accept_parenthesised_values() {
        let engine = engine();
        let ctx = output(json!({ "branch": "feature/login", "title": "WIP (draft)" }));
        assert_eq!(engine.evaluate_guard("branch matches ^(feature|hotfix)/", &ctx), Ok(true));
        assert_eq!(engine.evaluate_guard("branch not_matches ^(release|hotfix)/", &ctx), Ok(true));
        assert_eq!(engine.evaluate_guard(r#"title contains "(draft)""#, &ctx), Ok(true));
    }

    #[tokio::test]
    async fn false_guard_skips_without_calling_executor() {
        let engine = engine();
        let mock = Arc::new(MockExecutor::returning("deploy", output(json!({ "ok": true }))));
        engine.register_action_executor(mock.clone());

        let action = ActionDefinition::new("deploy").when("env eq prod");
        let ctx = output(json!({ "env": "staging" }));
        let result = engine.execute_action(&action, &ctx).await.unwrap();

        assert!(is_skipped(&result));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn true_guard_runs_executor() {
        let engine = engine();
        let mock = Arc::new(MockExecutor::returning("deploy", output(json!({ "ok": true }))));
        engine.register_action_executor(mock.clone());

        let action = ActionDefinition::new("deploy").when("env eq prod");
        let ctx = output(json!({ "env": "prod" }));
        let result = engine.execute_action(&action, &ctx).await.unwrap();

        assert_eq!(result["ok"], true);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_executor_is_an_error() {
        let engine = engine();
        let err = engine
            .execute_action(&ActionDefinition::new("manual"), &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err, RuleError::NoExecutor("manual".into()));
    }

    #[tokio::test]
    async fn executor_errors_are_wrapped() {
        let engine = engine();
        let err = engine
            .execute_action(&ActionDefinition::new("notification"), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::Action(actions::ActionError::MissingParameter { .. })));
    }
}
