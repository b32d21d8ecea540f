//! Core server socket implementation.
//!
//! This module contains the `ServerSocket` struct: the public contract of the
//! crate. It owns the listen session (listening socket, accept task and the
//! session cancellation token), the shared client table and the event system.

use crate::{
    config::SocketConfig,
    connection::{ClientId, ConnectionManager},
    error::ServerError,
    events::{current_timestamp, EventSystem, ServerDisconnectedEvent},
    server::handlers::handle_connection,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` before trying again.
///
/// Accept errors are usually resource exhaustion (`EMFILE`, `ENFILE`), which
/// would otherwise turn the loop into a busy spin.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// State of one `listen` .. `disconnect` cycle.
struct ListenSession {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// A multi-client TCP server socket.
///
/// `ServerSocket` accepts any number of concurrent clients on one port and
/// reports their lifecycle through its [`EventSystem`]. Each accepted client
/// gets its own receive task; bytes can be sent to all clients with
/// [`send`](Self::send) or to a single client with [`send_with`](Self::send_with).
///
/// # Lifecycle
///
/// idle → [`listen`](Self::listen) → listening → [`disconnect`](Self::disconnect) → idle
///
/// The server can be listened again after a disconnect. A failed `listen`
/// leaves it idle.
///
/// # Events
///
/// * `OnClientConnect` - once per accepted client, before any receive
/// * `OnReceive` - once per successful read, with exactly the bytes read
/// * `OnClientDisconnect` - once when a single client goes away
/// * `OnDisconnect` - once when an active listen session is torn down
///
/// Handlers should be registered before calling `listen`.
pub struct ServerSocket {
    /// Socket tuning for the listener and accepted clients
    config: Arc<SocketConfig>,

    /// Registry of lifecycle event handlers
    event_system: Arc<EventSystem>,

    /// Shared client table
    connection_manager: Arc<ConnectionManager>,

    /// Active listen session, if any
    session: Mutex<Option<ListenSession>>,

    /// Bound address of the active session, readable without awaiting
    local_addr: parking_lot::RwLock<Option<SocketAddr>>,
}

impl ServerSocket {
    /// Creates an idle server socket with default configuration.
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    /// Creates an idle server socket with the given configuration.
    pub fn with_config(config: SocketConfig) -> Self {
        Self {
            config: Arc::new(config),
            event_system: Arc::new(EventSystem::new()),
            connection_manager: Arc::new(ConnectionManager::new()),
            session: Mutex::new(None),
            local_addr: parking_lot::RwLock::new(None),
        }
    }

    /// Starts listening on all IPv4 interfaces at `port`.
    ///
    /// Port `0` binds an ephemeral port; the returned address carries the port
    /// actually bound.
    ///
    /// # Errors
    ///
    /// * [`ServerError::AlreadyListening`] if a listen session is active. The
    ///   active session is not affected.
    /// * [`ServerError::Network`] if the socket cannot be created, bound or put
    ///   into listening mode. The server stays idle.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let mut session = self.session.lock().await;
        if let Some(active) = session.as_ref() {
            return Err(ServerError::AlreadyListening(active.local_addr));
        }

        let listener = bind_listener(port, self.config.backlog)?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Failed to read bound address: {e}")))?;

        self.connection_manager.open();

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.connection_manager.clone(),
            self.event_system.clone(),
            self.config.clone(),
            shutdown.clone(),
        ));

        *session = Some(ListenSession {
            local_addr,
            shutdown,
            accept_task,
        });
        *self.local_addr.write() = Some(local_addr);

        info!("🚀 Server socket listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Sends `bytes` to every connected client.
    ///
    /// Writes run concurrently; a client whose write fails is skipped and does
    /// not affect delivery to the others. With no clients this is a no-op.
    ///
    /// # Returns
    ///
    /// The number of clients the bytes were written to.
    pub async fn send(&self, bytes: &[u8]) -> usize {
        self.connection_manager.broadcast_to_all(bytes).await
    }

    /// Sends `bytes` to a single client.
    ///
    /// # Errors
    ///
    /// * [`ServerError::UnknownClient`] if the client is not connected
    /// * [`ServerError::Network`] if the write fails. The client is then torn
    ///   down by its own receive loop.
    pub async fn send_with(&self, client_id: ClientId, bytes: &[u8]) -> Result<(), ServerError> {
        self.connection_manager.send_to_connection(client_id, bytes).await
    }

    /// Closes a single client.
    ///
    /// The client's receive loop stops, the client is removed and
    /// `OnClientDisconnect` fires with [`DisconnectReason::Local`]. This
    /// returns as soon as the close has been requested.
    ///
    /// [`DisconnectReason::Local`]: crate::events::DisconnectReason::Local
    pub fn disconnect_client(&self, client_id: ClientId) -> Result<(), ServerError> {
        self.connection_manager.kick_connection(client_id)
    }

    /// Tears down the listen session: stops accepting, closes every client and
    /// fires `OnDisconnect` once.
    ///
    /// Clients closed this way do not get an individual `OnClientDisconnect`;
    /// the single `OnDisconnect` covers them. Calling this while idle does
    /// nothing. When this returns the listening socket is closed and the port
    /// can be bound again. Client tasks are not awaited: every client has been
    /// removed and told to close, but its socket closes shortly afterwards
    /// when its task observes the cancellation.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            debug!("disconnect called on an idle server socket");
            return;
        };
        *self.local_addr.write() = None;

        // Drain first so every receive loop finds itself already removed.
        let closed_clients = self.connection_manager.close_all();
        active.shutdown.cancel();

        if let Err(e) = active.accept_task.await {
            error!("Accept loop for {} ended abnormally: {}", active.local_addr, e);
        }
        drop(session);

        info!(
            "🛑 Server socket on {} stopped, closed {} client(s)",
            active.local_addr, closed_clients
        );

        self.event_system.emit(&ServerDisconnectedEvent {
            local_addr: active.local_addr,
            closed_clients,
            timestamp: current_timestamp(),
        });
    }

    /// Whether a listen session is active.
    pub fn is_connected(&self) -> bool {
        self.local_addr.read().is_some()
    }

    /// Number of currently tracked clients.
    pub fn connected_clients(&self) -> usize {
        self.connection_manager.connection_count()
    }

    /// Bound address of the active listen session.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Snapshot of the currently tracked client IDs.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.connection_manager.client_ids()
    }

    /// Remote address of a tracked client.
    pub fn client_addr(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.connection_manager
            .get_connection(client_id)
            .map(|connection| connection.remote_addr)
    }

    /// The event system used to register lifecycle handlers.
    pub fn events(&self) -> Arc<EventSystem> {
        self.event_system.clone()
    }

    /// The configuration this server was created with.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

impl Default for ServerSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServerSocket {
    fn drop(&mut self) {
        if let Some(active) = self.session.get_mut().take() {
            self.connection_manager.close_all();
            active.shutdown.cancel();
            debug!("Server socket on {} dropped while listening", active.local_addr);
        }
    }
}

/// Creates the listening socket.
///
/// `SO_REUSEADDR` is only set on unix, where it lets a restarted server bind
/// through `TIME_WAIT`. On Windows it would allow two live listeners on one
/// port. `SO_REUSEPORT` is never set.
fn bind_listener(port: u16, backlog: u32) -> Result<TcpListener, ServerError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;

    #[cfg(unix)]
    socket.set_reuse_address(true).ok();

    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Network(format!("Bind failed on {addr}: {e}")))?;

    let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
    socket
        .listen(backlog)
        .map_err(|e| ServerError::Network(format!("Listen failed on {addr}: {e}")))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| ServerError::Network(format!("Failed to set nonblocking: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    TcpListener::from_std(std_listener)
        .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
}

/// Accepts connections until `shutdown` is cancelled, spawning one handler
/// task per connection.
async fn accept_loop(
    listener: TcpListener,
    connection_manager: Arc<ConnectionManager>,
    event_system: Arc<EventSystem>,
    config: Arc<SocketConfig>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    connection_manager.clone(),
                    event_system.clone(),
                    config.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    debug!("🛑 Accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_server_is_idle() {
        let server = ServerSocket::new();
        assert!(!server.is_connected());
        assert_eq!(server.connected_clients(), 0);
        assert!(server.local_addr().is_none());
        assert!(server.client_ids().is_empty());
    }

    #[tokio::test]
    async fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener(0, 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(addr.ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_bind_listener_port_in_use() {
        let first = bind_listener(0, 16).unwrap();
        let port = first.local_addr().unwrap().port();

        let second = bind_listener(port, 16);
        assert!(matches!(second, Err(ServerError::Network(_))));
    }

    #[tokio::test]
    async fn test_idle_operations_are_safe() {
        let server = ServerSocket::new();

        assert_eq!(server.send(b"nobody").await, 0);
        assert!(matches!(
            server.send_with(ClientId::from_raw(1), b"x").await,
            Err(ServerError::UnknownClient(_))
        ));
        assert!(server.disconnect_client(ClientId::from_raw(1)).is_err());

        server.disconnect().await;
        assert!(!server.is_connected());
    }
}
