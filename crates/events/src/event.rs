//! The `Event` contract and its concrete variants.
//!
//! An event is an immutable, timestamped fact with a source identifier and
//! an opaque key/value payload.  The payload is a JSON object so that rule
//! conditions can address it with dot paths (`event.data.status`).

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Opaque event payload.
pub type EventData = Map<String, Value>;

/// Events travel through the bus behind an `Arc` so handlers and channel
/// subscribers can share one allocation.
pub type SharedEvent = Arc<dyn Event>;

/// Contract implemented by every event variant.
pub trait Event: fmt::Debug + Send + Sync {
    /// Dotted event type, e.g. `workflow.task.created`.
    fn event_type(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
    /// Identifier of the producer (`orchestrator`, `git`, `jira`, …).
    fn source(&self) -> &str;
    fn data(&self) -> &EventData;
}

/// Render any event as a JSON object: `{type, source, timestamp, data}`.
///
/// Used to build rule evaluation contexts.
pub fn event_to_value(event: &dyn Event) -> Value {
    json!({
        "type": event.event_type(),
        "source": event.source(),
        "timestamp": event.timestamp().to_rfc3339(),
        "data": Value::Object(event.data().clone()),
    })
}

macro_rules! impl_event {
    ($ty:ty) => {
        impl Event for $ty {
            fn event_type(&self) -> &str {
                &self.event_type
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }

            fn source(&self) -> &str {
                &self.source
            }

            fn data(&self) -> &EventData {
                &self.data
            }
        }
    };
}

// ---------------------------------------------------------------------------
// GenericEvent
// ---------------------------------------------------------------------------

/// Free-form event for collaborators without a dedicated variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericEvent {
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: EventData,
}

impl GenericEvent {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            data: EventData::new(),
        }
    }

    /// Builder-style payload insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn into_shared(self) -> SharedEvent {
        Arc::new(self)
    }
}

impl_event!(GenericEvent);

// ---------------------------------------------------------------------------
// WorkflowEvent
// ---------------------------------------------------------------------------

/// Lifecycle event emitted by the orchestrator for one workflow instance.
///
/// `workflow_id` is also mirrored into the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_type: String,
    pub workflow_id: Uuid,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl WorkflowEvent {
    pub fn new(event_type: impl Into<String>, workflow_id: Uuid, mut data: EventData) -> Self {
        data.insert("workflow_id".into(), Value::String(workflow_id.to_string()));
        Self {
            event_type: event_type.into(),
            workflow_id,
            source: "orchestrator".into(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn into_shared(self) -> SharedEvent {
        Arc::new(self)
    }
}

impl_event!(WorkflowEvent);

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

/// A task changed state in some task provider (or inside the engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_type: String,
    pub task_id: String,
    pub workflow_id: Option<Uuid>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl TaskEvent {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        let task_id = task_id.into();
        let mut data = EventData::new();
        data.insert("task_id".into(), Value::String(task_id.clone()));
        Self {
            event_type: event_type.into(),
            task_id,
            workflow_id: None,
            source: source.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Attach the owning workflow instance.
    pub fn for_workflow(mut self, workflow_id: Uuid) -> Self {
        self.workflow_id = Some(workflow_id);
        self.data
            .insert("workflow_id".into(), Value::String(workflow_id.to_string()));
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn into_shared(self) -> SharedEvent {
        Arc::new(self)
    }
}

impl_event!(TaskEvent);

// ---------------------------------------------------------------------------
// GitEvent
// ---------------------------------------------------------------------------

/// Repository activity reported by the Git tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitEvent {
    pub event_type: String,
    pub repository: String,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl GitEvent {
    pub fn new(event_type: impl Into<String>, repository: impl Into<String>) -> Self {
        let repository = repository.into();
        let mut data = EventData::new();
        data.insert("repository".into(), Value::String(repository.clone()));
        Self {
            event_type: event_type.into(),
            repository,
            branch: None,
            commit: None,
            source: "git".into(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        self.data.insert("branch".into(), Value::String(branch.clone()));
        self.branch = Some(branch);
        self
    }

    pub fn at_commit(mut self, commit: impl Into<String>) -> Self {
        let commit = commit.into();
        self.data.insert("commit".into(), Value::String(commit.clone()));
        self.commit = Some(commit);
        self
    }

    pub fn into_shared(self) -> SharedEvent {
        Arc::new(self)
    }
}

impl_event!(GitEvent);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_event_mirrors_id_into_payload() {
        let id = Uuid::new_v4();
        let event = WorkflowEvent::new("workflow.created", id, EventData::new());
        assert_eq!(event.source(), "orchestrator");
        assert_eq!(event.data()["workflow_id"], id.to_string());
    }

    #[test]
    fn git_event_builders_fill_payload() {
        let event = GitEvent::new("git.push", "acme/api")
            .on_branch("feature/login")
            .at_commit("abc123");
        assert_eq!(event.data()["repository"], "acme/api");
        assert_eq!(event.data()["branch"], "feature/login");
        assert_eq!(event.commit.as_deref(), Some("abc123"));
    }

    #[test]
    fn event_to_value_exposes_type_and_data() {
        let event = GenericEvent::new("timer.fired", "scheduler").with("tick", 3);
        let value = event_to_value(&event);
        assert_eq!(value["type"], "timer.fired");
        assert_eq!(value["source"], "scheduler");
        assert_eq!(value["data"]["tick"], 3);
    }
}
