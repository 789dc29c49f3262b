//! `status` executor: record a status transition for a workflow or task.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::{into_output, tag_workflow};
use crate::params::Params;
use crate::{ActionContext, ActionDefinition, ActionError, ActionExecutor, ActionOutput};

const TYPE: &str = "status";

#[derive(Debug, Default, Clone, Copy)]
pub struct StatusExecutor;

#[async_trait]
impl ActionExecutor for StatusExecutor {
    fn action_type(&self) -> &str {
        TYPE
    }

    async fn execute(
        &self,
        action: &ActionDefinition,
        context: &ActionContext,
    ) -> Result<ActionOutput, ActionError> {
        let params = Params::new(TYPE, &action.parameters);
        let status = params.required_str("status")?;

        let output = json!({
            "target": params.str_or("target", "workflow")?,
            "status": status,
            "previous_status": context.get("status").cloned().unwrap_or(Value::Null),
            "reason": params.optional_str("reason")?,
            "updated_at": Utc::now().to_rfc3339(),
        });
        Ok(tag_workflow(into_output(output), context))
    }
}
