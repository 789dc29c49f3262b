//! `engine` crate: workflow models, stage graph validation, the rule engine
//! and the workflow orchestrator.

pub mod conditions;
pub mod config;
pub mod dag;
pub mod durations;
pub mod error;
pub mod expression;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod rules;

pub use conditions::ConditionEvaluator;
pub use config::OrchestratorConfig;
pub use dag::stage_order;
pub use error::{EngineError, RuleError};
pub use models::{
    ActionDefinition, ConditionDefinition, RetryPolicy, StageDefinition, TaskInstance, TaskStatus,
    TriggerDefinition, WorkflowDefinition, WorkflowInstance, WorkflowSettings, WorkflowStatus,
};
pub use orchestrator::{HealthReport, OrchestratorMetrics, WorkflowOrchestrator};
pub use registry::PluginRegistry;
pub use rules::RuleEngine;
