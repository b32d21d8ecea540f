//! Typed, multi-subscriber event system for connection lifecycle events.
//!
//! The server socket reports everything that happens on the wire through four
//! event types:
//!
//! * [`ClientConnectedEvent`] - a connection was accepted and is now tracked
//! * [`ReceiveEvent`] - bytes arrived from a tracked client
//! * [`ClientDisconnectedEvent`] - a single client went away
//! * [`ServerDisconnectedEvent`] - the whole listen session was torn down
//!
//! Any number of handlers can be registered per event type. Handlers run
//! sequentially in registration order on the task that produced the event, so
//! per-connection ordering (connect, receives, disconnect) is preserved for
//! every observer.

mod stats;
mod system;

pub use stats::EventSystemStats;
pub use system::EventSystem;

use crate::connection::ClientId;
use bytes::Bytes;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Core trait implemented by every event the server socket emits.
pub trait Event: Clone + Debug + Send + Sync + Any + 'static {
    /// Registry key for this event type.
    fn event_name() -> &'static str;

    /// Fully qualified Rust type name, used in handler names and diagnostics.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Reason a single client stopped being tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// The peer closed its side of the connection (read returned 0 bytes)
    ClientClosed,
    /// A read failed; the message is the underlying I/O error
    ConnectionError(String),
    /// The server closed this client through `disconnect_client`
    Local,
}

/// Fired exactly once per accepted connection, before any [`ReceiveEvent`]
/// for that connection.
#[derive(Debug, Clone, Serialize)]
pub struct ClientConnectedEvent {
    pub client_id: ClientId,
    pub remote_addr: SocketAddr,
    pub timestamp: u64,
}

/// Bytes read from a client, exactly as delivered by one read.
///
/// No framing is applied: one application-level write on the peer may arrive
/// as several events, and several writes may arrive as one.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiveEvent {
    pub client_id: ClientId,
    pub bytes: Bytes,
}

/// Fired when a client stops being tracked outside of a bulk shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ClientDisconnectedEvent {
    pub client_id: ClientId,
    pub reason: DisconnectReason,
    pub timestamp: u64,
}

/// Fired exactly once when `disconnect` tears down an active listen session.
#[derive(Debug, Clone, Serialize)]
pub struct ServerDisconnectedEvent {
    pub local_addr: SocketAddr,
    /// Clients that were closed by the teardown
    pub closed_clients: usize,
    pub timestamp: u64,
}

impl Event for ClientConnectedEvent {
    fn event_name() -> &'static str {
        "client_connect"
    }
}

impl Event for ReceiveEvent {
    fn event_name() -> &'static str {
        "receive"
    }
}

impl Event for ClientDisconnectedEvent {
    fn event_name() -> &'static str {
        "client_disconnect"
    }
}

impl Event for ServerDisconnectedEvent {
    fn event_name() -> &'static str {
        "disconnect"
    }
}

/// Comprehensive error type for event handling.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Handler execution failed during event processing
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
    /// A handler was invoked with an event of the wrong type
    #[error("Handler {handler} expected {expected}")]
    TypeMismatch {
        expected: &'static str,
        handler: String,
    },
}

/// Handler trait for processing events.
///
/// Most users will not implement this trait directly, but instead register
/// closures through [`EventSystem::on`] or one of the typed helpers.
pub trait EventHandler: Send + Sync + Debug + 'static {
    /// Handles a type-erased event.
    fn handle(&self, event: &dyn Any) -> Result<(), EventError>;

    /// Returns the TypeId of the event type this handler expects.
    fn expected_type_id(&self) -> TypeId;

    /// Returns a human-readable name for this handler for debugging.
    fn handler_name(&self) -> &str;
}

/// Type-safe wrapper for event handlers.
///
/// Bridges between the object-safe [`EventHandler`] trait and a closure that
/// takes a concrete event type.
pub struct TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(T) -> Result<(), EventError> + Send + Sync,
{
    handler: F,
    name: String,
    _phantom: std::marker::PhantomData<fn(T)>,
}

impl<T, F> Debug for TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(T) -> Result<(), EventError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedEventHandler")
            .field("name", &self.name)
            .finish()
    }
}

impl<T, F> TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(T) -> Result<(), EventError> + Send + Sync,
{
    /// Creates a new typed event handler.
    pub fn new(name: String, handler: F) -> Self {
        Self {
            handler,
            name,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T, F> EventHandler for TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(T) -> Result<(), EventError> + Send + Sync + 'static,
{
    fn handle(&self, event: &dyn Any) -> Result<(), EventError> {
        match event.downcast_ref::<T>() {
            Some(event) => (self.handler)(event.clone()),
            None => Err(EventError::TypeMismatch {
                expected: T::type_name(),
                handler: self.name.clone(),
            }),
        }
    }

    fn expected_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
