//! Server socket implementation modules.
//!
//! This module contains the public server type and the per-connection
//! handling logic.

pub mod core;
pub mod handlers;

pub use self::core::{ServerSocket, ACCEPT_ERROR_BACKOFF};
