//! Built-in executors.
//!
//! They validate parameters and synthesize a deterministic result map that
//! records what *would* happen; the provider I/O itself (task trackers,
//! chat, SMTP, Git hosting) belongs to collaborators outside this crate.

pub mod email;
pub mod git;
pub mod notification;
pub mod status;
pub mod task;

use std::sync::Arc;

use serde_json::Value;

use crate::{ActionContext, ActionExecutor, ActionOutput};

pub use email::EmailExecutor;
pub use git::GitExecutor;
pub use notification::NotificationExecutor;
pub use status::StatusExecutor;
pub use task::TaskExecutor;

/// One instance of every built-in executor.
pub fn all() -> Vec<Arc<dyn ActionExecutor>> {
    vec![
        Arc::new(TaskExecutor),
        Arc::new(NotificationExecutor),
        Arc::new(StatusExecutor),
        Arc::new(GitExecutor),
        Arc::new(EmailExecutor),
    ]
}

pub(crate) fn into_output(value: Value) -> ActionOutput {
    match value {
        Value::Object(map) => map,
        _ => ActionOutput::new(),
    }
}

/// Copy `workflow_id` from the context into the output when present.
pub(crate) fn tag_workflow(mut output: ActionOutput, context: &ActionContext) -> ActionOutput {
    if let Some(id) = context.get("workflow_id") {
        output.insert("workflow_id".into(), id.clone());
    }
    output
}
