//! Server socket configuration types and defaults.
//!
//! The listening contract deliberately exposes nothing beyond a port number;
//! these settings only tune how accepted sockets are read and how the
//! listening socket is created.

use serde::{Deserialize, Serialize};

/// Smallest receive buffer a receive loop will allocate.
pub const MIN_RECEIVE_BUFFER: usize = 1024;

/// Largest receive buffer a receive loop will allocate.
pub const MAX_RECEIVE_BUFFER: usize = 1024 * 1024;

/// Buffer size used when the OS does not report a receive buffer size.
pub const DEFAULT_RECEIVE_BUFFER: usize = 8192;

/// Configuration structure for the server socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Fixed receive buffer size per client. `None` uses the socket's
    /// `SO_RCVBUF`, clamped to [`MIN_RECEIVE_BUFFER`, `MAX_RECEIVE_BUFFER`].
    #[serde(default)]
    pub receive_buffer_size: Option<usize>,

    /// Whether to set `TCP_NODELAY` on accepted sockets
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// Pending connection backlog for the listening socket
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

fn default_nodelay() -> bool {
    true
}

fn default_backlog() -> u32 {
    1024
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: None,
            nodelay: default_nodelay(),
            backlog: default_backlog(),
        }
    }
}

impl SocketConfig {
    /// Resolves the receive buffer size for a connection.
    ///
    /// `recommended` is what the OS reports for the accepted socket, if anything.
    pub fn receive_buffer_for(&self, recommended: Option<usize>) -> usize {
        self.receive_buffer_size
            .or(recommended)
            .unwrap_or(DEFAULT_RECEIVE_BUFFER)
            .clamp(MIN_RECEIVE_BUFFER, MAX_RECEIVE_BUFFER)
    }
}
