//! Event dispatch
//!
//! ```text
//! Receiver → Event::decode → Dispatcher → handler lookup (eventType)
//!                                     ↓
//!                     spawn_blocking(handler.handle(event))   one task per message
//! ```
//!
//! Handlers run off the receive path, so a slow handler never stalls frame
//! reading. A handler that returns an error or panics is logged and
//! forgotten; the connection and other handlers are unaffected.

use crate::protocol::error::Result;
use crate::protocol::event::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Gate = Box<dyn Fn() -> bool + Send>;

/// Handler invoked for every event of a registered type
///
/// Runs on a blocking thread from the Tokio pool, not in an async context.
/// Any `Fn(Event) -> Result<()>` closure is a handler.
///
/// # Example
///
/// ```ignore
/// client.register_callback("trade", |event: Event| {
///     println!("trade: {}", event.data());
///     Ok(())
/// });
/// ```
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event
    ///
    /// # Errors
    /// Errors are logged by the dispatcher and otherwise ignored.
    fn handle(&self, event: Event) -> Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(Event) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, event: Event) -> Result<()> {
        self(event)
    }
}

/// Registry of handlers keyed by `eventType`
///
/// Cloning shares the same registry. Registration replaces any existing
/// handler for the type and is safe while dispatch is in flight.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn EventHandler>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure, replacing any previous handler for `event_type`
    pub fn register<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(Event) -> Result<()> + Send + Sync + 'static,
    {
        self.register_handler(event_type, handler);
    }

    /// Register a handler, replacing any previous one for `event_type`
    pub fn register_handler<H>(&self, event_type: impl Into<String>, handler: H)
    where
        H: EventHandler,
    {
        let event_type = event_type.into();
        let replaced = self
            .handlers
            .write()
            .insert(event_type.clone(), Arc::new(handler))
            .is_some();
        if replaced {
            debug!(event_type = %event_type, "Replaced existing handler");
        }
    }

    /// Remove the handler for `event_type`, returning whether one existed
    pub fn unregister(&self, event_type: &str) -> bool {
        self.handlers.write().remove(event_type).is_some()
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers.read().contains_key(event_type)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Dispatch an event to its handler on a dedicated blocking task
    ///
    /// Returns `None` when no handler is registered for the event type.
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, event: Event) -> Option<JoinHandle<()>> {
        self.spawn(event, None)
    }

    /// Like [`dispatch`](Self::dispatch), but the handler is skipped if
    /// `gate` returns false by the time the task runs
    pub fn dispatch_gated<G>(&self, event: Event, gate: G) -> Option<JoinHandle<()>>
    where
        G: Fn() -> bool + Send + 'static,
    {
        self.spawn(event, Some(Box::new(gate)))
    }

    fn spawn(&self, event: Event, gate: Option<Gate>) -> Option<JoinHandle<()>> {
        // Clone the handler out so the lock is released before spawning
        let handler = self.handlers.read().get(event.event_type()).cloned();

        let Some(handler) = handler else {
            info!(event_type = %event.event_type(), "No callback registered for event type");
            return None;
        };

        Some(tokio::task::spawn_blocking(move || {
            if let Some(gate) = gate {
                if !gate() {
                    debug!(event_type = %event.event_type(), "Dispatch gate closed, discarding event");
                    return;
                }
            }
            invoke(handler.as_ref(), event);
        }))
    }
}

/// Run a handler inside its own panic boundary
fn invoke(handler: &dyn EventHandler, event: Event) {
    let event_type = event.event_type().to_string();

    match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(event_type = %event_type, "Callback execution failed: {}", e);
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(event_type = %event_type, "Callback panicked: {}", reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error::TradexWsError;
    use parking_lot::Mutex;
    use serde_json::json;

    fn event(kind: &str, id: i64) -> Event {
        Event::decode(format!(r#"{{"eventType":"{}","data":{{"id":{}}}}}"#, kind, id).as_bytes())
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_invokes_registered_handler() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        dispatcher.register("trade", move |event: Event| {
            sink.lock().push(event.into_data());
            Ok(())
        });

        dispatcher.dispatch(event("trade", 1)).unwrap().await.unwrap();
        assert_eq!(*seen.lock(), vec![json!({"id": 1})]);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&hits);
        dispatcher.register("order", move |_| {
            first.lock().push("first");
            Ok(())
        });
        let second = Arc::clone(&hits);
        dispatcher.register("order", move |_| {
            second.lock().push("second");
            Ok(())
        });

        assert_eq!(dispatcher.handler_count(), 1);
        dispatcher.dispatch(event("order", 1)).unwrap().await.unwrap();
        assert_eq!(*hits.lock(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_affect_others() {
        let dispatcher = Dispatcher::new();
        let orders = Arc::new(Mutex::new(0));

        dispatcher.register("trade", |_| -> Result<()> { panic!("boom") });
        let counter = Arc::clone(&orders);
        dispatcher.register("order", move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        // The panic is contained inside the task
        dispatcher.dispatch(event("trade", 1)).unwrap().await.unwrap();
        dispatcher.dispatch(event("order", 2)).unwrap().await.unwrap();
        assert_eq!(*orders.lock(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("trade", |_| Err(TradexWsError::Handler("rejected".into())));

        assert!(dispatcher.dispatch(event("trade", 1)).unwrap().await.is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_event_type_is_dropped() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        dispatcher.register("trade", move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        assert!(dispatcher.dispatch(event("unknown", 1)).is_none());
        dispatcher.dispatch(event("trade", 2)).unwrap().await.unwrap();
        assert_eq!(*hits.lock(), 1);
    }

    #[tokio::test]
    async fn test_closed_gate_skips_handler() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        dispatcher.register("trade", move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        dispatcher
            .dispatch_gated(event("trade", 1), || false)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(*hits.lock(), 0);
    }

    #[tokio::test]
    async fn test_gate_checked_when_task_runs() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        dispatcher.register("order", move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        // The gate closes after dispatch but before the task can read it
        let open = Arc::new(Mutex::new(true));
        let gate = Arc::clone(&open);
        let mut guard = open.lock();
        let handle = dispatcher
            .dispatch_gated(event("order", 1), move || *gate.lock())
            .unwrap();
        *guard = false;
        drop(guard);
        handle.await.unwrap();

        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn test_unregister() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("trade", |_| Ok(()));
        assert!(dispatcher.is_registered("trade"));
        assert!(dispatcher.unregister("trade"));
        assert!(!dispatcher.unregister("trade"));
    }
}
