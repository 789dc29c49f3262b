//! Publish pipeline middleware.
//!
//! Middleware is composed strictly in registration order: middleware[0]
//! wraps middleware[1] … wraps the terminal handler dispatch.  Each one
//! decides whether (and with which event) to call [`Next::run`]; returning
//! without calling it short-circuits the publish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info_span, Instrument};

use crate::bus::{EventBus, PublishReport};
use crate::{BusError, SharedEvent};

/// A cross-cutting publish step.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        event: SharedEvent,
        next: Next<'_>,
    ) -> Result<PublishReport, BusError>;
}

/// The remainder of the chain after the current middleware.
pub struct Next<'a> {
    bus: &'a EventBus,
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(bus: &'a EventBus, chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { bus, chain }
    }

    /// Pass the event on to the next middleware, or to the handlers once the
    /// chain is exhausted.
    pub async fn run(self, event: SharedEvent) -> Result<PublishReport, BusError> {
        match self.chain.split_first() {
            Some((current, rest)) => current.handle(event, Next::new(self.bus, rest)).await,
            None => Ok(self.bus.publish_to_handlers(event).await),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingMiddleware
// ---------------------------------------------------------------------------

/// Wraps the rest of the pipeline in a `publish` tracing span.
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        event: SharedEvent,
        next: Next<'_>,
    ) -> Result<PublishReport, BusError> {
        let span = info_span!(
            "publish",
            event_type = %event.event_type(),
            source = %event.source()
        );
        async move {
            let started = Instant::now();
            let result = next.run(event).await;
            match &result {
                Ok(report) => debug!(
                    delivered = report.delivered,
                    failed = report.failures.len(),
                    dropped = report.dropped,
                    elapsed = ?started.elapsed(),
                    "event published"
                ),
                Err(err) => debug!(error = %err, "event rejected"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

// ---------------------------------------------------------------------------
// DeduplicationMiddleware
// ---------------------------------------------------------------------------

/// Drops an event if an identical one (same type, source and payload) was
/// published within `window`.
#[derive(Debug)]
pub struct DeduplicationMiddleware {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DeduplicationMiddleware {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn fingerprint(event: &SharedEvent) -> String {
        let payload = serde_json::to_string(event.data()).unwrap_or_default();
        format!("{}|{}|{}", event.event_type(), event.source(), payload)
    }
}

#[async_trait]
impl Middleware for DeduplicationMiddleware {
    async fn handle(
        &self,
        event: SharedEvent,
        next: Next<'_>,
    ) -> Result<PublishReport, BusError> {
        let key = Self::fingerprint(&event);
        let duplicate = {
            let mut seen = self.seen.lock();
            let now = Instant::now();
            seen.retain(|_, at| now.duration_since(*at) < self.window);
            if seen.contains_key(&key) {
                true
            } else {
                seen.insert(key, now);
                false
            }
        };

        if duplicate {
            return Err(BusError::Rejected {
                event_type: event.event_type().to_owned(),
                reason: "duplicate event".into(),
            });
        }
        next.run(event).await
    }
}

// ---------------------------------------------------------------------------
// RateLimitMiddleware
// ---------------------------------------------------------------------------

/// Fixed-window rate limit, counted per event type.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    max_events: u32,
    window: Duration,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimitMiddleware {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        event: SharedEvent,
        next: Next<'_>,
    ) -> Result<PublishReport, BusError> {
        let allowed = {
            let mut windows = self.windows.lock();
            let now = Instant::now();
            let entry = windows
                .entry(event.event_type().to_owned())
                .or_insert((now, 0));
            if now.duration_since(entry.0) >= self.window {
                *entry = (now, 0);
            }
            entry.1 += 1;
            entry.1 <= self.max_events
        };

        if !allowed {
            return Err(BusError::RateLimited(event.event_type().to_owned()));
        }
        next.run(event).await
    }
}
