//! Error types and handling for the server socket.
//!
//! This module defines the error types that can surface through the public
//! contract. Per-client I/O failures never appear here: they are handled as a
//! disconnect of that one client and reported through the event system.

use crate::connection::ClientId;
use std::net::SocketAddr;

/// Enumeration of possible server socket errors.
///
/// Every variant is recoverable. After any of these errors the server is left
/// in a consistent state and can be used again.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or write failures
    #[error("Network error: {0}")]
    Network(String),

    /// `listen` was called while a listen session is already active
    #[error("Already listening on {0}")]
    AlreadyListening(SocketAddr),

    /// The client is not (or no longer) tracked by this server
    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),
}
