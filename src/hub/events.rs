//! Hub lifecycle events
//!
//! Observers subscribe to a broadcast stream instead of registering
//! callbacks, so nothing user-defined ever runs on the hub worker.
//! The stream is lossy: a lagging subscriber skips events rather than
//! slowing the hub down.

/// Event published by the hub worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A peer entered the registry
    ClientRegistered {
        /// Registered id
        client_id: String,
    },
    /// A peer left the registry
    ClientUnregistered {
        /// Removed id
        client_id: String,
    },
    /// A targeted message was handed to the recipient's send queue
    MessageForwarded {
        /// Recipient id
        client_id: String,
        /// Size of the forwarded frame
        bytes: usize,
    },
    /// A targeted message could not be delivered
    MessageDropped {
        /// Addressed id
        client_id: String,
    },
}
