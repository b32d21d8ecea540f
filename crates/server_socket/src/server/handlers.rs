//! Connection handling logic for accepted TCP clients.
//!
//! This module contains the per-connection task that manages the lifecycle of
//! one client: registration, the connect event, the receive loop and cleanup.

use crate::{
    config::SocketConfig,
    connection::{ClientConnection, ConnectionManager},
    events::{
        current_timestamp, ClientConnectedEvent, ClientDisconnectedEvent, DisconnectReason,
        EventSystem, ReceiveEvent,
    },
};
use bytes::Bytes;
use socket2::SockRef;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{tcp::OwnedReadHalf, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Handles a single client connection from acceptance to cleanup.
///
/// # Connection Flow
///
/// 1. Apply socket options and size the receive buffer
/// 2. Register the connection with the connection manager
/// 3. Emit [`ClientConnectedEvent`] (all handlers finish before the first read)
/// 4. Read until the peer closes, a read fails or the connection is cancelled,
///    emitting one [`ReceiveEvent`] per successful read
/// 5. Remove the connection and emit [`ClientDisconnectedEvent`]
///
/// If the connection was already drained by a server-wide disconnect, step 5
/// is silent: the server reports that teardown with a single event instead.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_manager: Arc<ConnectionManager>,
    event_system: Arc<EventSystem>,
    config: Arc<SocketConfig>,
    session: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(config.nodelay) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    let recommended = SockRef::from(&stream).recv_buffer_size().ok();
    let buffer_size = config.receive_buffer_for(recommended);

    let (reader, writer) = stream.into_split();
    let client_id = connection_manager.next_client_id();
    let connection = Arc::new(ClientConnection::new(
        client_id,
        addr,
        writer,
        session.child_token(),
    ));

    if !register_connection(&connection_manager, &connection, &session) {
        debug!("🚫 Dropping connection from {}: server is shutting down", addr);
        return;
    }

    event_system.emit(&ClientConnectedEvent {
        client_id,
        remote_addr: addr,
        timestamp: current_timestamp(),
    });

    let reason = receive_loop(reader, &connection, &event_system, buffer_size).await;

    if connection_manager.remove_connection(client_id).is_some() {
        event_system.emit(&ClientDisconnectedEvent {
            client_id,
            reason,
            timestamp: current_timestamp(),
        });
    } else {
        trace!("Client {} drained by server shutdown", client_id);
    }
}

/// Inserts `connection` into the table unless its listen session has ended.
///
/// Returns `false` if the connection is not tracked afterwards. Only the
/// session decides: a connection closed individually stays registered so its
/// receive loop can report the close.
fn register_connection(
    connection_manager: &ConnectionManager,
    connection: &Arc<ClientConnection>,
    session: &CancellationToken,
) -> bool {
    if !connection_manager.add_connection(connection.clone()) {
        return false;
    }

    // The session ended while this connection was being registered. Undo the
    // insert in case a new session has opened since.
    if session.is_cancelled() {
        connection_manager.remove_connection(connection.id);
        return false;
    }
    true
}

/// Reads from the client until it goes away, returning why.
///
/// The read half is dropped when this returns; together with the manager
/// releasing the write half this closes the socket.
async fn receive_loop(
    mut reader: OwnedReadHalf,
    connection: &ClientConnection,
    event_system: &EventSystem,
    buffer_size: usize,
) -> DisconnectReason {
    let client_id = connection.id;
    let cancel = connection.cancellation();
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return DisconnectReason::Local,
            read = reader.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                debug!("🔌 Client {} closed the connection", client_id);
                return DisconnectReason::ClientClosed;
            }
            Ok(n) => {
                // Bytes that land after a close request are not delivered.
                if cancel.is_cancelled() {
                    return DisconnectReason::Local;
                }

                trace!("📨 Received {} bytes from client {}", n, client_id);
                event_system.emit(&ReceiveEvent {
                    client_id,
                    bytes: Bytes::copy_from_slice(&buffer[..n]),
                });
            }
            Err(e) => {
                warn!("⚠️ Read error from client {}: {}", client_id, e);
                return DisconnectReason::ConnectionError(e.to_string());
            }
        }
    }
}
