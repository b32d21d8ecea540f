//! Connection management for accepted client sockets.
//!
//! This module handles the lifecycle of client connections, including
//! identity assignment, the shared client table and outgoing writes.

pub mod client;
pub mod manager;

pub use client::ClientConnection;
pub use manager::ConnectionManager;

use serde::Serialize;
use std::fmt;

/// Opaque identity of an accepted connection.
///
/// Identities are allocated from a per-server counter and never reused, so a
/// stale `ClientId` can only ever miss; it can never address a newer client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(usize);

impl ClientId {
    /// Wraps a raw identifier.
    pub fn from_raw(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub fn as_raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
