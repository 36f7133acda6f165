//! Client seam between the hub and the transport layer
//!
//! The hub routes to anything implementing [`Client`]; in production
//! that is a peer client wrapping a live connection, in tests a mock
//! that records what it was asked to deliver.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// A registered peer reachable through the hub
#[async_trait]
pub trait Client: Send + Sync {
    /// Stable unique id of the peer
    fn id(&self) -> &str;

    /// Enqueue a message for delivery
    ///
    /// Non-blocking: fails fast on a saturated queue or closed
    /// connection instead of stalling the caller.
    fn send(&self, message: Bytes) -> Result<()>;

    /// Shut the underlying connection down
    ///
    /// Runs on the hub worker, so implementations must not wait on
    /// anything that could itself be waiting on the hub.
    async fn close(&self);

    /// Whether the underlying connection has been closed
    fn is_closed(&self) -> bool;
}
