//! The `EventHandler` trait: the contract every bus subscriber must fulfil.

use async_trait::async_trait;

use crate::SharedEvent;

/// An async subscriber invoked synchronously (on the publisher's task) for
/// every matching event.
///
/// Handlers registered under [`crate::WILDCARD`] see every event type and are
/// expected to narrow it down through [`EventHandler::can_handle`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name used as the key of per-handler latency metrics.
    fn name(&self) -> &str;

    fn can_handle(&self, _event_type: &str) -> bool {
        true
    }

    /// Handle the event.  An error is logged and reported to the publisher
    /// but never stops sibling handlers.
    async fn handle(&self, event: SharedEvent) -> anyhow::Result<()>;
}
