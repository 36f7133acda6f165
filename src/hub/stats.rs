//! Hub statistics

use serde::Serialize;

/// Snapshot of hub counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubStats {
    /// Currently registered peers
    pub connected_clients: usize,
    /// Messages successfully handed to a recipient's send queue
    pub messages_sent: u64,
    /// Messages accepted from producers
    pub messages_received: u64,
    /// Deliveries that failed at the recipient's send queue
    pub messages_failed: u64,
    /// Seconds since the hub was created
    pub uptime_seconds: f64,
}
