//! Handler registry and event emission.

use super::{
    ClientConnectedEvent, ClientDisconnectedEvent, Event, EventError, EventHandler,
    EventSystemStats, ReceiveEvent, ServerDisconnectedEvent, TypedEventHandler,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// The event system that manages handler registration and dispatch.
///
/// Handlers are stored per event name in registration order. Emission takes a
/// snapshot of the handler list first, so a handler may register further
/// handlers without deadlocking; those only see subsequent events.
pub struct EventSystem {
    /// Map of event names to their registered handlers
    handlers: DashMap<&'static str, Vec<Arc<dyn EventHandler>>>,
    /// System statistics for monitoring
    stats: RwLock<EventSystemStats>,
}

impl std::fmt::Debug for EventSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSystem")
            .field("handlers", &"[handlers]")
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl EventSystem {
    /// Creates a new event system with no registered handlers.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            stats: RwLock::new(EventSystemStats::default()),
        }
    }

    /// Registers a handler for events of type `T`.
    ///
    /// Handlers of the same event type are invoked in the order they were
    /// registered.
    pub fn on<T, F>(&self, handler: F)
    where
        T: Event,
        F: Fn(T) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let event_name = T::event_name();
        let handler_name = format!("{}::{}", event_name, T::type_name());
        let handler: Arc<dyn EventHandler> = Arc::new(TypedEventHandler::new(handler_name, handler));

        self.handlers
            .entry(event_name)
            .or_insert_with(Vec::new)
            .push(handler);

        self.stats.write().total_handlers += 1;
        debug!("📝 Registered handler for {}", event_name);
    }

    /// Registers a handler fired once per accepted connection.
    pub fn on_client_connect<F>(&self, handler: F)
    where
        F: Fn(ClientConnectedEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on(handler);
    }

    /// Registers a handler fired when a single client stops being tracked.
    pub fn on_client_disconnect<F>(&self, handler: F)
    where
        F: Fn(ClientDisconnectedEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on(handler);
    }

    /// Registers a handler fired for every chunk of bytes read from a client.
    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(ReceiveEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on(handler);
    }

    /// Registers a handler fired when the listen session is torn down.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(ServerDisconnectedEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on(handler);
    }

    /// Emits an event to every handler registered for its type.
    ///
    /// Handler failures are logged and counted; they never stop later handlers
    /// and are never returned to the emitter.
    pub fn emit<T: Event>(&self, event: &T) {
        let event_name = T::event_name();

        // Clone the list out of the map so no shard lock is held while user
        // code runs.
        let handlers = self
            .handlers
            .get(event_name)
            .map(|entry| entry.value().clone());

        let mut failures = 0u64;
        if let Some(handlers) = handlers {
            trace!("📤 Emitting {} to {} handlers", event_name, handlers.len());
            for handler in handlers.iter() {
                // A panicking handler must not unwind into the connection task.
                match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("❌ Handler {} failed: {}", handler.handler_name(), e);
                        failures += 1;
                    }
                    Err(panic) => {
                        error!(
                            "💥 Handler {} panicked: {}",
                            handler.handler_name(),
                            panic_message(panic.as_ref())
                        );
                        failures += 1;
                    }
                }
            }
        }

        let mut stats = self.stats.write();
        stats.events_emitted += 1;
        stats.handler_failures += failures;
    }

    /// Number of handlers registered for events of type `T`.
    pub fn handler_count<T: Event>(&self) -> usize {
        self.handlers
            .get(T::event_name())
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Gets the current event system statistics.
    pub fn stats(&self) -> EventSystemStats {
        self.stats.read().clone()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Default for EventSystem {
    fn default() -> Self {
        Self::new()
    }
}
