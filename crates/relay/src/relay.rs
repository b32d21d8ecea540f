//! Forwarding of received bytes according to the relay mode.
//!
//! Event handlers run synchronously on the connection's task, so the receive
//! handler only queues the chunk. A single relay task drains the queue and
//! performs the async sends, which keeps chunks from one client in order.

use crate::config::RelayMode;
use server_socket::{ReceiveEvent, ServerSocket};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Registers the relay handler on `server` and spawns the relay task.
///
/// Returns `None` in [`RelayMode::Silent`], where nothing is forwarded. The
/// task holds only a weak reference to the server and ends once the server
/// (and with it the handler's sender) is dropped.
pub fn attach(server: &Arc<ServerSocket>, mode: RelayMode) -> Option<JoinHandle<()>> {
    if mode == RelayMode::Silent {
        return None;
    }

    let (sender, receiver) = mpsc::unbounded_channel::<ReceiveEvent>();
    server.events().on_receive(move |event| {
        // The relay task only stops once the server is gone.
        if sender.send(event).is_err() {
            trace!("Relay task stopped; dropping chunk");
        }
        Ok(())
    });

    Some(tokio::spawn(run(Arc::downgrade(server), mode, receiver)))
}

async fn run(server: Weak<ServerSocket>, mode: RelayMode, mut receiver: mpsc::UnboundedReceiver<ReceiveEvent>) {
    while let Some(event) = receiver.recv().await {
        let Some(server) = server.upgrade() else {
            break;
        };
        forward(&server, mode, event).await;
    }
    debug!("🛑 Relay task stopped");
}

/// Sends one received chunk on according to `mode`.
pub async fn forward(server: &ServerSocket, mode: RelayMode, event: ReceiveEvent) {
    match mode {
        RelayMode::Echo => {
            if let Err(e) = server.send_with(event.client_id, &event.bytes).await {
                warn!("Echo to client {} failed: {}", event.client_id, e);
            }
        }
        RelayMode::Broadcast => {
            let delivered = server.send(&event.bytes).await;
            trace!(
                "📡 Relayed {} bytes from client {} to {} client(s)",
                event.bytes.len(),
                event.client_id,
                delivered
            );
        }
        RelayMode::Silent => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const WAIT: Duration = Duration::from_secs(5);

    async fn connect(server: &ServerSocket, addr: SocketAddr) -> TcpStream {
        let expected = server.connected_clients() + 1;
        let stream = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        tokio::time::timeout(WAIT, async {
            while server.connected_clients() < expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server never tracked the client");
        stream
    }

    async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
            .await
            .expect("timed out waiting for relayed bytes")
            .unwrap();
        buf
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_echo_returns_bytes_to_sender() {
        let server = Arc::new(ServerSocket::new());
        let task = attach(&server, RelayMode::Echo);
        assert!(task.is_some());

        let addr = server.listen(0).await.unwrap();
        let mut sender = connect(&server, addr).await;
        let mut other = connect(&server, addr).await;

        sender.write_all(b"ping").await.unwrap();
        assert_eq!(read_exactly(&mut sender, 4).await, b"ping");

        let mut buf = [0u8; 4];
        let nothing = tokio::time::timeout(Duration::from_millis(200), other.read(&mut buf)).await;
        assert!(nothing.is_err());

        server.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_broadcast_reaches_all_clients() {
        let server = Arc::new(ServerSocket::new());
        attach(&server, RelayMode::Broadcast);

        let addr = server.listen(0).await.unwrap();
        let mut sender = connect(&server, addr).await;
        let mut other = connect(&server, addr).await;

        sender.write_all(b"news").await.unwrap();
        assert_eq!(read_exactly(&mut other, 4).await, b"news");
        assert_eq!(read_exactly(&mut sender, 4).await, b"news");

        server.disconnect().await;
    }

    #[tokio::test]
    async fn test_silent_registers_nothing() {
        let server = Arc::new(ServerSocket::new());
        assert!(attach(&server, RelayMode::Silent).is_none());
        assert_eq!(server.events().handler_count::<ReceiveEvent>(), 0);
    }

    #[tokio::test]
    async fn test_task_stops_when_server_dropped() {
        let server = Arc::new(ServerSocket::new());
        let task = attach(&server, RelayMode::Echo).unwrap();

        drop(server);
        tokio::time::timeout(WAIT, task)
            .await
            .expect("relay task outlived the server")
            .unwrap();
    }
}
