//! In-process publish/subscribe bus.
//!
//! `EventBus::publish`:
//! 1. Rejects the event if the bus has been closed.
//! 2. Runs it through the middleware chain (see [`crate::middleware`]).
//! 3. Dispatches to every handler registered for the event's type or for
//!    [`WILDCARD`] whose `can_handle` accepts it, sequentially, on the
//!    caller's task, recovering errors *and panics* so one handler can never
//!    block its siblings.
//! 4. Offers the event to every channel subscriber with `try_send`; a full
//!    buffer drops the event for that subscriber instead of blocking.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::{BusMetrics, MetricsRecorder};
use crate::middleware::{Middleware, Next};
use crate::{BusError, EventHandler, SharedEvent};

/// Subscription key matching every event type.
pub const WILDCARD: &str = "*";

// ---------------------------------------------------------------------------
// PublishReport
// ---------------------------------------------------------------------------

/// A handler that returned an error or panicked while handling an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerFailure {
    pub handler: String,
    pub message: String,
    pub panicked: bool,
}

/// Outcome of one dispatch, returned to the publisher.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    pub event_type: String,
    /// Successful handler invocations plus successful channel sends.
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
    /// Channel subscribers that missed the event (full or closed buffer).
    pub dropped: usize,
}

impl PublishReport {
    fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_owned(),
            ..Self::default()
        }
    }

    /// True when no handler failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn panics(&self) -> impl Iterator<Item = &HandlerFailure> {
        self.failures.iter().filter(|f| f.panicked)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Registry of handlers, channel subscribers and middleware.
///
/// All registries sit behind `RwLock`s; locks are only held while cloning
/// the relevant subscriber list, never across an `.await`.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    channels: RwLock<HashMap<String, Vec<mpsc::Sender<SharedEvent>>>>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    metrics: Mutex<MetricsRecorder>,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event_type` (or [`WILDCARD`]).
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        debug!("handler '{}' subscribed to '{}'", handler.name(), event_type);
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Register a raw delivery channel for external consumers.
    pub fn subscribe_channel(&self, event_type: impl Into<String>, sender: mpsc::Sender<SharedEvent>) {
        self.channels
            .write()
            .entry(event_type.into())
            .or_default()
            .push(sender);
    }

    /// Append a middleware to the end of the chain.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware.write().push(middleware);
    }

    /// Publish an event and wait for every handler to finish.
    ///
    /// # Errors
    /// - [`BusError::Closed`] after [`EventBus::close`].
    /// - Whatever error a middleware short-circuits with.
    pub async fn publish(&self, event: SharedEvent) -> Result<PublishReport, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let chain: Vec<Arc<dyn Middleware>> = self.middleware.read().clone();
        Next::new(self, &chain).run(event).await
    }

    /// Fire-and-forget publish on a background task.  Errors are only logged.
    pub fn publish_async(self: &Arc<Self>, event: SharedEvent) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let event_type = event.event_type().to_owned();
            match bus.publish(event).await {
                Ok(report) if !report.is_clean() => warn!(
                    "async publish of '{}' had {} handler failure(s)",
                    event_type,
                    report.failures.len()
                ),
                Ok(_) => {}
                Err(err) => error!("async publish of '{}' failed: {}", event_type, err),
            }
        })
    }

    /// Terminal step of the middleware chain.
    pub(crate) async fn publish_to_handlers(&self, event: SharedEvent) -> PublishReport {
        let started = Instant::now();
        let event_type = event.event_type().to_owned();
        let mut report = PublishReport::new(&event_type);

        for handler in self.handlers_for(&event_type) {
            if !handler.can_handle(&event_type) {
                continue;
            }

            let handler_started = Instant::now();
            let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&event)))
                .catch_unwind()
                .await;
            self.metrics
                .lock()
                .record_handler(handler.name(), handler_started.elapsed());

            let failure = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => {
                    error!("handler '{}' failed on '{}': {:#}", handler.name(), event_type, err);
                    HandlerFailure {
                        handler: handler.name().to_owned(),
                        message: format!("{err:#}"),
                        panicked: false,
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("handler '{}' panicked on '{}': {}", handler.name(), event_type, message);
                    HandlerFailure {
                        handler: handler.name().to_owned(),
                        message,
                        panicked: true,
                    }
                }
            };
            self.metrics.lock().record_failure();
            report.failures.push(failure);
        }

        for sender in self.channels_for(&event_type) {
            match sender.try_send(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("channel subscriber for '{}' is full, dropping event", event_type);
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("channel subscriber for '{}' has gone away", event_type);
                    report.dropped += 1;
                }
            }
        }

        self.metrics.lock().record_event(started.elapsed());
        report
    }

    /// Copy of the current counters.
    pub fn metrics(&self) -> BusMetrics {
        self.metrics.lock().snapshot()
    }

    /// Number of handlers registered under exactly `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Drop every channel subscriber and refuse further publishes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let dropped: usize = self.channels.write().drain().map(|(_, s)| s.len()).sum();
        debug!("event bus closed ({} channel subscriber(s) released)", dropped);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let handlers = self.handlers.read();
        let mut matched: Vec<Arc<dyn EventHandler>> =
            handlers.get(event_type).cloned().unwrap_or_default();
        if event_type != WILDCARD {
            if let Some(wildcard) = handlers.get(WILDCARD) {
                matched.extend(wildcard.iter().cloned());
            }
        }
        matched
    }

    fn channels_for(&self, event_type: &str) -> Vec<mpsc::Sender<SharedEvent>> {
        let channels = self.channels.read();
        let mut matched = channels.get(event_type).cloned().unwrap_or_default();
        if event_type != WILDCARD {
            if let Some(wildcard) = channels.get(WILDCARD) {
                matched.extend(wildcard.iter().cloned());
            }
        }
        matched
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panicked with a non-string payload".to_owned()
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::middleware::{DeduplicationMiddleware, RateLimitMiddleware};
    use crate::GenericEvent;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    struct RecordingHandler {
        name: String,
        only: Option<String>,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl RecordingHandler {
        fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                only: None,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn filtered(name: &str, only: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                only: Some(only.into()),
                behaviour: Behaviour::Succeed,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn can_handle(&self, event_type: &str) -> bool {
            self.only.as_deref().map_or(true, |only| only == event_type)
        }

        async fn handle(&self, _event: SharedEvent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::Fail => anyhow::bail!("boom"),
                Behaviour::Panic => panic!("handler exploded"),
            }
        }
    }

    struct RejectAll;

    #[async_trait]
    impl Middleware for RejectAll {
        async fn handle(&self, event: SharedEvent, _next: Next<'_>) -> Result<PublishReport, BusError> {
            Err(BusError::Rejected {
                event_type: event.event_type().to_owned(),
                reason: "blocked".into(),
            })
        }
    }

    /// Records its label before and after calling `next`.
    struct Tracer {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tracer {
        async fn handle(&self, event: SharedEvent, next: Next<'_>) -> Result<PublishReport, BusError> {
            self.log.lock().push(format!("{}:before", self.label));
            let result = next.run(event).await;
            self.log.lock().push(format!("{}:after", self.label));
            result
        }
    }

    fn event(event_type: &str) -> SharedEvent {
        GenericEvent::new(event_type, "test").into_shared()
    }

    #[tokio::test]
    async fn handlers_only_receive_their_event_type() {
        let bus = EventBus::new();
        let created = RecordingHandler::new("created", Behaviour::Succeed);
        let closed = RecordingHandler::new("closed", Behaviour::Succeed);
        bus.subscribe("task.created", created.clone());
        bus.subscribe("task.closed", closed.clone());

        let report = bus.publish(event("task.created")).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(created.calls(), 1);
        assert_eq!(closed.calls(), 0);
    }

    #[tokio::test]
    async fn wildcard_handlers_self_filter() {
        let bus = EventBus::new();
        let everything = RecordingHandler::new("everything", Behaviour::Succeed);
        let git_only = RecordingHandler::filtered("git-only", "git.push");
        bus.subscribe(WILDCARD, everything.clone());
        bus.subscribe(WILDCARD, git_only.clone());

        bus.publish(event("task.created")).await.unwrap();
        bus.publish(event("git.push")).await.unwrap();

        assert_eq!(everything.calls(), 2);
        assert_eq!(git_only.calls(), 1);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_siblings() {
        let bus = EventBus::new();
        let bad = RecordingHandler::new("bad", Behaviour::Fail);
        let good = RecordingHandler::new("good", Behaviour::Succeed);
        bus.subscribe("task.updated", bad.clone());
        bus.subscribe("task.updated", good.clone());

        let report = bus.publish(event("task.updated")).await.unwrap();

        assert_eq!(good.calls(), 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].handler, "bad");
        assert!(!report.failures[0].panicked);
        assert_eq!(bus.metrics().events_failed, 1);
    }

    #[tokio::test]
    async fn handler_panic_is_reported_to_publisher() {
        let bus = EventBus::new();
        let crashing = RecordingHandler::new("crashing", Behaviour::Panic);
        let good = RecordingHandler::new("good", Behaviour::Succeed);
        bus.subscribe("task.updated", crashing);
        bus.subscribe("task.updated", good.clone());

        let report = bus.publish(event("task.updated")).await.unwrap();

        assert_eq!(good.calls(), 1);
        let panics: Vec<_> = report.panics().collect();
        assert_eq!(panics.len(), 1);
        assert_eq!(panics[0].message, "handler exploded");
    }

    #[tokio::test]
    async fn short_circuiting_middleware_skips_all_handlers() {
        let bus = EventBus::new();
        let handler = RecordingHandler::new("h", Behaviour::Succeed);
        bus.subscribe("task.created", handler.clone());
        bus.add_middleware(Arc::new(RejectAll));

        let err = bus.publish(event("task.created")).await.unwrap_err();

        assert!(matches!(err, BusError::Rejected { ref reason, .. } if reason == "blocked"));
        assert_eq!(handler.calls(), 0);
        assert_eq!(bus.metrics().events_processed, 0);
    }

    #[tokio::test]
    async fn middleware_wraps_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add_middleware(Arc::new(Tracer { label: "outer", log: log.clone() }));
        bus.add_middleware(Arc::new(Tracer { label: "inner", log: log.clone() }));

        bus.publish(event("x")).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking_or_counting_failure() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(1);
        bus.subscribe_channel("tick", tx);

        let first = bus.publish(event("tick")).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), bus.publish(event("tick")))
            .await
            .expect("publish must not block on a full channel")
            .unwrap();

        assert_eq!(first.delivered, 1);
        assert_eq!(second.dropped, 1);
        assert_eq!(bus.metrics().events_failed, 0);
        assert_eq!(rx.recv().await.unwrap().event_type(), "tick");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_releases_channels_and_rejects_publish() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(4);
        bus.subscribe_channel(WILDCARD, tx);

        bus.close();

        assert!(rx.recv().await.is_none());
        assert_eq!(bus.publish(event("x")).await.unwrap_err(), BusError::Closed);
    }

    #[tokio::test]
    async fn publish_async_delivers_in_background() {
        let bus = Arc::new(EventBus::new());
        let handler = RecordingHandler::new("h", Behaviour::Succeed);
        bus.subscribe("later", handler.clone());

        bus.publish_async(event("later")).await.unwrap();

        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn deduplication_rejects_repeat_within_window() {
        let bus = EventBus::new();
        let handler = RecordingHandler::new("h", Behaviour::Succeed);
        bus.subscribe("git.push", handler.clone());
        bus.add_middleware(Arc::new(DeduplicationMiddleware::new(Duration::from_secs(60))));

        let push = || GenericEvent::new("git.push", "git").with("commit", "abc").into_shared();
        bus.publish(push()).await.unwrap();
        let second = bus.publish(push()).await;

        assert!(matches!(second, Err(BusError::Rejected { .. })));
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_caps_events_per_window() {
        let bus = EventBus::new();
        bus.add_middleware(Arc::new(RateLimitMiddleware::new(2, Duration::from_secs(60))));

        assert!(bus.publish(event("spam")).await.is_ok());
        assert!(bus.publish(event("spam")).await.is_ok());
        assert_eq!(
            bus.publish(event("spam")).await.unwrap_err(),
            BusError::RateLimited("spam".into())
        );
        assert!(bus.publish(event("other")).await.is_ok());
    }
}
