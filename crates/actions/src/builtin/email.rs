//! `email` executor.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{into_output, tag_workflow};
use crate::ids::next_id;
use crate::params::Params;
use crate::{ActionContext, ActionDefinition, ActionError, ActionExecutor, ActionOutput};

const TYPE: &str = "email";

#[derive(Debug, Default, Clone, Copy)]
pub struct EmailExecutor;

#[async_trait]
impl ActionExecutor for EmailExecutor {
    fn action_type(&self) -> &str {
        TYPE
    }

    async fn execute(
        &self,
        action: &ActionDefinition,
        context: &ActionContext,
    ) -> Result<ActionOutput, ActionError> {
        let params = Params::new(TYPE, &action.parameters);
        let to = params.required_list("to")?;
        let subject = params.required_str("subject")?;

        let output = json!({
            "message_id": next_id("email"),
            "to": to,
            "cc": params.string_list("cc")?,
            "subject": subject,
            "body": params.str_or("body", "")?,
            "status": "queued",
            "queued_at": Utc::now().to_rfc3339(),
        });
        Ok(tag_workflow(into_output(output), context))
    }
}
