//! The event bus: the single channel every component publishes state
//! changes onto, and the single channel every subscriber (including the
//! conversation log writer) listens on.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{error, info_span, Instrument};

const HISTORY_CAPACITY: usize = 1_000;

/// A single event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Box<dyn Fn(&Event) -> HandlerFuture + Send + Sync>;

/// In-process publish/subscribe bus with bounded history.
///
/// Constructed once at startup and shared via `Arc`; every component that
/// publishes or subscribes holds a clone of that `Arc`, never a private bus.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    history: Mutex<Vec<Event>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        })
    }

    /// Register a handler for an exact event type, or `"*"` for every event.
    pub async fn subscribe<F, Fut>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Handler = Box::new(move |event| Box::pin(handler(event)));
        let mut handlers = self.handlers.write().await;
        handlers.entry(event_type.into()).or_default().push(boxed);
    }

    /// Publish an event, waiting for every matching handler to run.
    ///
    /// A handler that panics is caught and logged; it never stops delivery
    /// to the remaining handlers.
    pub async fn publish(&self, event: Event) {
        let span = info_span!("event_bus", event_type = %event.event_type);
        async {
            self.record_history(event.clone()).await;

            let handlers = self.handlers.read().await;
            let mut targets: Vec<&Handler> = Vec::new();
            if let Some(exact) = handlers.get(&event.event_type) {
                targets.extend(exact.iter());
            }
            if let Some(wildcard) = handlers.get("*") {
                targets.extend(wildcard.iter());
            }

            for handler in targets {
                let fut = AssertUnwindSafe(handler(&event)).catch_unwind();
                if let Err(panic) = fut.await {
                    error!(
                        event_type = %event.event_type,
                        panic = ?panic,
                        "event bus handler panicked"
                    );
                }
            }
        }
        .instrument(span)
        .await;
    }

    /// Fire-and-forget publish: spawns the publish as a background task so
    /// the caller never waits on subscriber handlers.
    pub fn publish_nowait(self: &Arc<Self>, event: Event) {
        let bus = self.clone();
        tokio::spawn(async move {
            bus.publish(event).await;
        });
    }

    async fn record_history(&self, event: Event) {
        let mut history = self.history.lock().await;
        history.push(event);
        if history.len() > HISTORY_CAPACITY {
            let overflow = history.len() - HISTORY_CAPACITY;
            history.drain(0..overflow);
        }
    }

    /// Snapshot of the most recent events, oldest first, optionally
    /// restricted to an exact `event_type` and always clamped to
    /// `HISTORY_CAPACITY` regardless of the requested `limit`.
    pub async fn history(&self, filter: Option<&str>, limit: usize) -> Vec<Event> {
        let history = self.history.lock().await;
        let limit = limit.min(HISTORY_CAPACITY);
        let matching: Vec<Event> = match filter {
            Some(event_type) => history.iter().filter(|e| e.event_type == event_type).cloned().collect(),
            None => history.clone(),
        };
        if matching.len() > limit {
            matching[matching.len() - limit..].to_vec()
        } else {
            matching
        }
    }

    /// Wait for the next event of the given type that satisfies `predicate`,
    /// or until `timeout_duration` elapses.
    pub async fn wait_for<P>(
        self: &Arc<Self>,
        event_type: impl Into<String>,
        timeout_duration: Duration,
        predicate: P,
    ) -> Option<Event>
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::channel(1);
        let tx = Arc::new(Mutex::new(Some(tx)));
        let tx_for_handler = tx.clone();

        self.subscribe(event_type, move |event: &Event| {
            let event = event.clone();
            let tx = tx_for_handler.clone();
            let matched = predicate(&event);
            async move {
                if matched {
                    if let Some(sender) = tx.lock().await.take() {
                        let _ = sender.send(event).await;
                    }
                }
            }
        })
        .await;

        timeout(timeout_duration, rx.recv()).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn subscriber_receives_matching_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        bus.subscribe("task.assigned", move |_event| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.publish(Event::new("task.assigned", serde_json::json!({}))).await;
        bus.publish(Event::new("task.done", serde_json::json!({}))).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wildcard_subscriber_receives_everything() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        bus.subscribe("*", move |_event| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.publish(Event::new("a", serde_json::json!({}))).await;
        bus.publish(Event::new("b", serde_json::json!({}))).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wait_for_times_out_without_match() {
        let bus = EventBus::new();
        let result = bus
            .wait_for("never", Duration::from_millis(20), |_| true)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn wait_for_resolves_on_match() {
        let bus = EventBus::new();
        let bus_clone = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            bus_clone
                .publish(Event::new("lease.expired", serde_json::json!({"task_id": "t1"})))
                .await;
        });

        let found = bus
            .wait_for("lease.expired", Duration::from_secs(1), |e| {
                e.payload["task_id"] == "t1"
            })
            .await;
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn history_evicts_beyond_capacity() {
        let bus = EventBus::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            bus.publish(Event::new("x", serde_json::json!({ "i": i }))).await;
        }
        let history = bus.history(None, HISTORY_CAPACITY).await;
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].payload["i"], 10);
    }

    #[tokio::test]
    async fn history_filters_by_event_type() {
        let bus = EventBus::new();
        bus.publish(Event::new("a", serde_json::json!({}))).await;
        bus.publish(Event::new("b", serde_json::json!({}))).await;
        bus.publish(Event::new("a", serde_json::json!({}))).await;

        let history = bus.history(Some("a"), 10).await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.event_type == "a"));
    }

    #[tokio::test]
    async fn history_respects_limit() {
        let bus = EventBus::new();
        for i in 0..5 {
            bus.publish(Event::new("x", serde_json::json!({ "i": i }))).await;
        }
        let history = bus.history(None, 2).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload["i"], 3);
        assert_eq!(history[1].payload["i"], 4);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_block_siblings() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe("x", |_event| async move {
            panic!("boom");
        })
        .await;

        let count_clone = count.clone();
        bus.subscribe("x", move |_event| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.publish(Event::new("x", serde_json::json!({}))).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
