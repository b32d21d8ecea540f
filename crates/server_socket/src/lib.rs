//! # Server Socket - Multi-Client TCP Listener
//!
//! A TCP server abstraction that accepts any number of concurrent clients,
//! reports their lifecycle through typed events and supports both broadcast and
//! targeted sends.
//!
//! ## Core Features
//!
//! * **Simple contract** - `listen`, `send`, `send_with`, `disconnect`
//! * **Lifecycle events** - connect, receive, client disconnect, server disconnect
//! * **Independent clients** - one task per connection; a failing client never
//!   affects the others
//! * **Raw bytes** - no framing; each receive delivers exactly what one read
//!   returned
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use server_socket::{ServerSocket, ReceiveEvent};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(ServerSocket::new());
//!
//!     server.events().on_client_connect(|event| {
//!         println!("client {} connected from {}", event.client_id, event.remote_addr);
//!         Ok(())
//!     });
//!     server.events().on_receive(|event: ReceiveEvent| {
//!         println!("client {} sent {} bytes", event.client_id, event.bytes.len());
//!         Ok(())
//!     });
//!
//!     let addr = server.listen(7777).await?;
//!     println!("listening on {addr}");
//!
//!     server.send(b"hello everyone").await;
//!     server.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Event Ordering
//!
//! For any single client, handlers observe `OnClientConnect`, then every
//! `OnReceive` in stream order, then at most one `OnClientDisconnect`. There is
//! no ordering across clients. Handlers run on the connection's task, so a slow
//! handler delays only that connection.
//!
//! ## Shutdown
//!
//! [`ServerSocket::disconnect`] closes the listener and every client and fires a
//! single `OnDisconnect`. Clients closed this way do not receive individual
//! `OnClientDisconnect` events.
//!
//! ## Error Handling
//!
//! Public operations return [`ServerError`]. Per-client I/O failures are never
//! returned to callers; they surface as a client disconnect event.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod server;

pub use config::SocketConfig;
pub use connection::ClientId;
pub use error::ServerError;
pub use events::{
    current_timestamp, ClientConnectedEvent, ClientDisconnectedEvent, DisconnectReason, Event,
    EventError, EventSystem, EventSystemStats, ReceiveEvent, ServerDisconnectedEvent,
};
pub use server::ServerSocket;
