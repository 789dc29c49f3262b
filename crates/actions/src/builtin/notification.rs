//! `notification` executor.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{into_output, tag_workflow};
use crate::ids::next_id;
use crate::params::Params;
use crate::{ActionContext, ActionDefinition, ActionError, ActionExecutor, ActionOutput};

const TYPE: &str = "notification";

#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationExecutor;

#[async_trait]
impl ActionExecutor for NotificationExecutor {
    fn action_type(&self) -> &str {
        TYPE
    }

    async fn execute(
        &self,
        action: &ActionDefinition,
        context: &ActionContext,
    ) -> Result<ActionOutput, ActionError> {
        let params = Params::new(TYPE, &action.parameters);
        let message = params.required_str("message")?;

        let output = json!({
            "notification_id": next_id("notification"),
            "channel": params.str_or("channel", "default")?,
            "recipients": params.string_list("recipients")?,
            "priority": params.str_or("priority", "normal")?,
            "message": message,
            "status": "queued",
            "queued_at": Utc::now().to_rfc3339(),
        });
        Ok(tag_workflow(into_output(output), context))
    }
}
