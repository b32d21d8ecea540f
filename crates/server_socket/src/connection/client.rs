//! Client connection representation.
//!
//! A `ClientConnection` owns the write half of an accepted socket. The read
//! half lives in the connection's receive loop task, so the socket is fully
//! closed once the task has exited and the last `Arc` to this record is gone.

use super::ClientId;
use std::io;
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Represents an individual client connection to the server.
#[derive(Debug)]
pub struct ClientConnection {
    /// Stable identity used to address targeted sends
    pub id: ClientId,

    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When this connection was accepted
    pub connected_at: SystemTime,

    /// Write half of the socket; the mutex keeps concurrent writes from
    /// interleaving their bytes
    writer: Mutex<OwnedWriteHalf>,

    /// Cancels this client's receive loop
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Creates a new client connection record.
    ///
    /// `cancel` should be a child of the listen session token so a bulk
    /// shutdown reaches every client.
    pub fn new(
        id: ClientId,
        remote_addr: SocketAddr,
        writer: OwnedWriteHalf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            remote_addr,
            connected_at: SystemTime::now(),
            writer: Mutex::new(writer),
            cancel,
        }
    }

    /// Writes all of `bytes` to the client.
    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closing",
            ));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Signals the receive loop to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether `close` (or a session-wide shutdown) has been requested.
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by the receive loop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
