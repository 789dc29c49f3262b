//! `events` crate: the `Event` contract and the in-process event bus.
//!
//! Every collaborator (task providers, the Git tracker, timers, the workflow
//! orchestrator itself) speaks to the rest of the system by publishing
//! [`Event`]s on an [`EventBus`].  Subscribers are either async
//! [`EventHandler`]s or raw bounded channels.

pub mod bus;
pub mod error;
pub mod event;
pub mod handler;
pub mod metrics;
pub mod middleware;

pub use bus::{panic_message, EventBus, HandlerFailure, PublishReport, WILDCARD};
pub use error::BusError;
pub use event::{Event, EventData, GenericEvent, GitEvent, SharedEvent, TaskEvent, WorkflowEvent};
pub use handler::EventHandler;
pub use metrics::BusMetrics;
pub use middleware::{
    DeduplicationMiddleware, LoggingMiddleware, Middleware, Next, RateLimitMiddleware,
};
