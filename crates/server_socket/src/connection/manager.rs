//! Connection manager for tracking and writing to client connections.
//!
//! This module provides the shared client table. It is mutated by connection
//! tasks (insert on accept, self-removal on close), by bulk shutdown (drain)
//! and read by sends and property queries, all concurrently.

use super::{client::ClientConnection, ClientId};
use crate::error::ServerError;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client table plus the flag that gates insertion.
///
/// Both live under one lock so a drain and a concurrent insert can never
/// interleave: an insert either lands before the drain (and is drained) or is
/// rejected.
#[derive(Debug, Default)]
struct ClientTable {
    accepting: bool,
    clients: HashMap<ClientId, Arc<ClientConnection>>,
}

/// Central manager for all client connections.
///
/// The lock is synchronous and never held across an `.await`; writes happen on
/// cloned `Arc<ClientConnection>` handles after the lock is released.
#[derive(Debug)]
pub struct ConnectionManager {
    table: RwLock<ClientTable>,

    /// Counter for generating unique client IDs
    next_id: AtomicUsize,
}

impl ConnectionManager {
    /// Creates a new connection manager that rejects insertions until
    /// [`open`](Self::open) is called.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(ClientTable::default()),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Allocates the identity for a newly accepted connection.
    pub fn next_client_id(&self) -> ClientId {
        ClientId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Starts accepting insertions for a new listen session.
    pub fn open(&self) {
        self.table.write().accepting = true;
    }

    /// Adds a connection to the table.
    ///
    /// Returns `false` if the manager is closed, in which case the caller owns
    /// the connection and must drop it.
    pub fn add_connection(&self, connection: Arc<ClientConnection>) -> bool {
        let mut table = self.table.write();
        if !table.accepting {
            return false;
        }

        info!("🔗 Client {} connected from {}", connection.id, connection.remote_addr);
        table.clients.insert(connection.id, connection);
        true
    }

    /// Removes a connection from the table.
    ///
    /// Returns the removed connection. Exactly one caller observes `Some` for a
    /// given client, which makes that caller responsible for announcing the
    /// disconnect.
    pub fn remove_connection(&self, client_id: ClientId) -> Option<Arc<ClientConnection>> {
        let removed = self.table.write().clients.remove(&client_id);
        if let Some(connection) = &removed {
            info!("❌ Client {} from {} disconnected", client_id, connection.remote_addr);
        }
        removed
    }

    /// Looks up a tracked connection.
    pub fn get_connection(&self, client_id: ClientId) -> Option<Arc<ClientConnection>> {
        self.table.read().clients.get(&client_id).cloned()
    }

    /// Number of tracked connections.
    pub fn connection_count(&self) -> usize {
        self.table.read().clients.len()
    }

    /// Snapshot of all tracked client IDs.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.table.read().clients.keys().copied().collect()
    }

    /// Sends bytes to a specific connection.
    pub async fn send_to_connection(&self, client_id: ClientId, bytes: &[u8]) -> Result<(), ServerError> {
        let connection = self
            .get_connection(client_id)
            .ok_or(ServerError::UnknownClient(client_id))?;

        connection.write(bytes).await.map_err(|e| {
            warn!("Failed to send {} bytes to client {}: {}", bytes.len(), client_id, e);
            ServerError::Network(format!("Write to client {client_id} failed: {e}"))
        })
    }

    /// Broadcasts bytes to all currently tracked connections.
    ///
    /// Writes run concurrently so one stalled peer does not delay the others.
    /// A failed write is logged and skipped; the failing client is torn down by
    /// its own receive loop.
    ///
    /// # Returns
    ///
    /// The number of connections the bytes were written to.
    pub async fn broadcast_to_all(&self, bytes: &[u8]) -> usize {
        let targets: Vec<Arc<ClientConnection>> = self.table.read().clients.values().cloned().collect();
        if targets.is_empty() {
            return 0;
        }

        let mut writes = targets
            .iter()
            .map(|connection| async move {
                match connection.write(bytes).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to broadcast to client {}: {}", connection.id, e);
                        false
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut delivered = 0;
        while let Some(ok) = writes.next().await {
            if ok {
                delivered += 1;
            }
        }

        debug!("📡 Broadcasted {} bytes to {}/{} clients", bytes.len(), delivered, targets.len());
        delivered
    }

    /// Closes one connection.
    ///
    /// The connection stays in the table until its receive loop observes the
    /// close and removes it, so the disconnect is announced on the same task
    /// that delivered its receives.
    pub fn kick_connection(&self, client_id: ClientId) -> Result<(), ServerError> {
        let connection = self
            .get_connection(client_id)
            .ok_or(ServerError::UnknownClient(client_id))?;
        connection.close();
        Ok(())
    }

    /// Stops accepting insertions, drains the table and closes every drained
    /// connection.
    ///
    /// # Returns
    ///
    /// The number of connections that were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<ClientConnection>> = {
            let mut table = self.table.write();
            table.accepting = false;
            table.clients.drain().map(|(_, connection)| connection).collect()
        };

        for connection in &drained {
            connection.close();
        }
        drained.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;

    /// Builds a tracked-connection record backed by a real loopback socket and
    /// returns the peer end.
    async fn loopback_connection(manager: &ConnectionManager) -> (Arc<ClientConnection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, remote_addr) = listener.accept().await.unwrap();
        let (_reader, writer) = accepted.into_split();

        let connection = Arc::new(ClientConnection::new(
            manager.next_client_id(),
            remote_addr,
            writer,
            CancellationToken::new(),
        ));
        (connection, peer)
    }

    #[tokio::test]
    async fn test_rejects_insert_until_open() {
        let manager = ConnectionManager::new();
        let (connection, _peer) = loopback_connection(&manager).await;

        assert!(!manager.add_connection(connection.clone()));
        assert_eq!(manager.connection_count(), 0);

        manager.open();
        assert!(manager.add_connection(connection));
        assert_eq!(manager.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_client_ids_are_unique() {
        let manager = ConnectionManager::new();
        let a = manager.next_client_id();
        let b = manager.next_client_id();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_remove_is_observed_once() {
        let manager = ConnectionManager::new();
        manager.open();
        let (connection, _peer) = loopback_connection(&manager).await;
        let id = connection.id;
        manager.add_connection(connection);

        assert!(manager.remove_connection(id).is_some());
        assert!(manager.remove_connection(id).is_none());
        assert_eq!(manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_connection() {
        let manager = ConnectionManager::new();
        manager.open();
        let (connection, mut peer) = loopback_connection(&manager).await;
        let id = connection.id;
        manager.add_connection(connection);

        manager.send_to_connection(id, b"Hi").await.unwrap();

        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"Hi");
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let manager = ConnectionManager::new();
        let result = manager.send_to_connection(ClientId::from_raw(99), b"x").await;
        assert!(matches!(result, Err(ServerError::UnknownClient(id)) if id.as_raw() == 99));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let manager = ConnectionManager::new();
        manager.open();
        let (first, mut first_peer) = loopback_connection(&manager).await;
        let (second, mut second_peer) = loopback_connection(&manager).await;
        manager.add_connection(first);
        manager.add_connection(second);

        assert_eq!(manager.broadcast_to_all(b"Hello").await, 2);

        for peer in [&mut first_peer, &mut second_peer] {
            let mut buf = [0u8; 5];
            peer.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"Hello");
        }
    }

    #[tokio::test]
    async fn test_broadcast_with_no_connections() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.broadcast_to_all(b"Hello").await, 0);
    }

    #[tokio::test]
    async fn test_close_all_drains_and_closes() {
        let manager = ConnectionManager::new();
        manager.open();
        let (first, _p1) = loopback_connection(&manager).await;
        let (second, _p2) = loopback_connection(&manager).await;
        manager.add_connection(first.clone());
        manager.add_connection(second.clone());

        assert_eq!(manager.close_all(), 2);
        assert_eq!(manager.connection_count(), 0);
        assert!(first.is_closing());
        assert!(second.is_closing());

        // Closed managers reject late inserts from in-flight accepts.
        let (late, _p3) = loopback_connection(&manager).await;
        assert!(!manager.add_connection(late));
    }

    #[tokio::test]
    async fn test_kick_connection_keeps_entry_until_removed() {
        let manager = ConnectionManager::new();
        manager.open();
        let (connection, _peer) = loopback_connection(&manager).await;
        let id = connection.id;
        manager.add_connection(connection.clone());

        manager.kick_connection(id).unwrap();
        assert!(connection.is_closing());
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.send_to_connection(id, b"late").await.is_err());

        assert!(matches!(
            manager.kick_connection(ClientId::from_raw(12345)),
            Err(ServerError::UnknownClient(_))
        ));
    }
}
