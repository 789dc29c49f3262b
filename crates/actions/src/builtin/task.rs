//! `task` executor: create, update, assign and close tasks.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use super::{into_output, tag_workflow};
use crate::ids::next_id;
use crate::params::Params;
use crate::{ActionContext, ActionDefinition, ActionError, ActionExecutor, ActionOutput};

const TYPE: &str = "task";

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskExecutor;

#[async_trait]
impl ActionExecutor for TaskExecutor {
    fn action_type(&self) -> &str {
        TYPE
    }

    async fn execute(
        &self,
        action: &ActionDefinition,
        context: &ActionContext,
    ) -> Result<ActionOutput, ActionError> {
        let params = Params::new(TYPE, &action.parameters);
        let operation = params.str_or("action", "create")?;
        debug!("task executor running '{}'", operation);

        let output = match operation.as_str() {
            "create" => {
                let title = params.required_str("title")?;
                json!({
                    "action": "create",
                    "task_id": next_id("task"),
                    "title": title,
                    "description": params.str_or("description", "")?,
                    "assignee": params.optional_str("assignee")?,
                    "priority": params.str_or("priority", "medium")?,
                    "labels": params.string_list("labels")?,
                    "status": "open",
                    "created_at": Utc::now().to_rfc3339(),
                })
            }
            "update" => {
                let task_id = params.required_str("task_id")?;
                let mut updated = Vec::new();
                let status = params.optional_str("status")?;
                if status.is_some() {
                    updated.push("status");
                }
                let progress = params.optional_f64("progress")?;
                if progress.is_some() {
                    updated.push("progress");
                }
                let comment = params.optional_str("comment")?;
                if comment.is_some() {
                    updated.push("comment");
                }
                json!({
                    "action": "update",
                    "task_id": task_id,
                    "status": status,
                    "progress": progress,
                    "comment": comment,
                    "updated_fields": updated,
                    "updated_at": Utc::now().to_rfc3339(),
                })
            }
            "assign" => json!({
                "action": "assign",
                "task_id": params.required_str("task_id")?,
                "assignee": params.required_str("assignee")?,
                "assigned_at": Utc::now().to_rfc3339(),
            }),
            "close" => json!({
                "action": "close",
                "task_id": params.required_str("task_id")?,
                "resolution": params.str_or("resolution", "done")?,
                "status": "closed",
                "closed_at": Utc::now().to_rfc3339(),
            }),
            other => {
                return Err(ActionError::Unsupported {
                    action: TYPE.into(),
                    operation: other.into(),
                })
            }
        };

        Ok(tag_workflow(into_output(output), context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(action: ActionDefinition) -> Result<ActionOutput, ActionError> {
        TaskExecutor.execute(&action, &ActionContext::new()).await
    }

    #[tokio::test]
    async fn create_is_the_default_operation() {
        let out = run(ActionDefinition::new("task").with_param("title", "Review PR"))
            .await
            .unwrap();
        assert_eq!(out["action"], "create");
        assert_eq!(out["title"], "Review PR");
        assert_eq!(out["priority"], "medium");
        assert!(out["task_id"].as_str().unwrap().starts_with("task-"));
    }

    #[tokio::test]
    async fn create_without_title_fails() {
        let err = run(ActionDefinition::new("task")).await.unwrap_err();
        assert!(matches!(err, ActionError::MissingParameter { ref parameter, .. } if parameter == "title"));
    }

    #[tokio::test]
    async fn assign_requires_assignee() {
        let action = ActionDefinition::new("task")
            .with_param("action", "assign")
            .with_param("task_id", "T-1");
        let err = run(action).await.unwrap_err();
        assert!(matches!(err, ActionError::MissingParameter { ref parameter, .. } if parameter == "assignee"));
    }

    #[tokio::test]
    async fn update_lists_changed_fields() {
        let action = ActionDefinition::new("task")
            .with_param("action", "update")
            .with_param("task_id", "T-1")
            .with_param("progress", 40);
        let out = run(action).await.unwrap();
        assert_eq!(out["updated_fields"], json!(["progress"]));
    }

    #[tokio::test]
    async fn unknown_operation_is_unsupported() {
        let action = ActionDefinition::new("task").with_param("action", "archive");
        let err = run(action).await.unwrap_err();
        assert_eq!(
            err,
            ActionError::Unsupported { action: "task".into(), operation: "archive".into() }
        );
    }

    #[tokio::test]
    async fn workflow_id_is_copied_from_context() {
        let mut context = ActionContext::new();
        context.insert("workflow_id".into(), json!("wf-1"));
        let action = ActionDefinition::new("task")
            .with_param("action", "close")
            .with_param("task_id", "T-9");
        let out = TaskExecutor.execute(&action, &context).await.unwrap();
        assert_eq!(out["workflow_id"], "wf-1");
        assert_eq!(out["resolution"], "done");
    }
}
