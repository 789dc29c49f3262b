//! `git` executor: branch, commit, pull-request and merge operations.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{into_output, tag_workflow};
use crate::ids::next_id;
use crate::params::Params;
use crate::{ActionContext, ActionDefinition, ActionError, ActionExecutor, ActionOutput};

const TYPE: &str = "git";

#[derive(Debug, Default, Clone, Copy)]
pub struct GitExecutor;

#[async_trait]
impl ActionExecutor for GitExecutor {
    fn action_type(&self) -> &str {
        TYPE
    }

    async fn execute(
        &self,
        action: &ActionDefinition,
        context: &ActionContext,
    ) -> Result<ActionOutput, ActionError> {
        let params = Params::new(TYPE, &action.parameters);
        let operation = params.required_str("operation")?;
        let repository = params.str_or("repository", "origin")?;

        let output = match operation.as_str() {
            "create_branch" => json!({
                "operation": operation,
                "repository": repository,
                "branch": params.required_str("branch")?,
                "base": params.str_or("base", "main")?,
            }),
            "commit" => json!({
                "operation": operation,
                "repository": repository,
                "commit": next_id("commit"),
                "message": params.required_str("message")?,
                "branch": params.optional_str("branch")?,
            }),
            "create_pull_request" => json!({
                "operation": operation,
                "repository": repository,
                "pull_request": next_id("pr"),
                "title": params.required_str("title")?,
                "source_branch": params.required_str("source_branch")?,
                "target_branch": params.str_or("target_branch", "main")?,
                "state": "open",
            }),
            "merge" => json!({
                "operation": operation,
                "repository": repository,
                "pull_request": params.required_str("pull_request")?,
                "strategy": params.str_or("strategy", "merge")?,
                "state": "merged",
            }),
            other => {
                return Err(ActionError::Unsupported {
                    action: TYPE.into(),
                    operation: other.into(),
                })
            }
        };

        let mut output = into_output(output);
        output.insert("performed_at".into(), json!(Utc::now().to_rfc3339()));
        Ok(tag_workflow(output, context))
    }
}
