//! Event-bus error types.

use thiserror::Error;

/// Errors returned by [`crate::EventBus::publish`].
///
/// Individual handler failures are *not* errors at this level; they are
/// collected in the [`crate::PublishReport`].  Only the bus itself or a
/// middleware can fail a publish.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// `close()` has been called on the bus.
    #[error("event bus is closed")]
    Closed,

    /// A middleware refused to forward the event.
    #[error("event '{event_type}' rejected: {reason}")]
    Rejected {
        event_type: String,
        reason: String,
    },

    /// The rate-limit middleware dropped the event.
    #[error("rate limit exceeded for event type '{0}'")]
    RateLimited(String),

    /// Catch-all for custom middleware.
    #[error("middleware error: {0}")]
    Middleware(String),
}
