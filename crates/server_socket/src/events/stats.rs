//! Statistics tracking for the event system.

use serde::Serialize;

/// Core event system statistics for monitoring
#[derive(Debug, Default, Clone, Serialize)]
pub struct EventSystemStats {
    /// Total number of registered event handlers
    pub total_handlers: usize,
    /// Total number of events emitted since creation
    pub events_emitted: u64,
    /// Number of handler invocations that returned an error
    pub handler_failures: u64,
}
