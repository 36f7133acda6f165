//! Per-message request context
//!
//! Carries the connection handle and the raw inbound frame into the
//! handlers. This is the explicit-argument rendition of the source
//! system's connection-in-context pattern: the register handler takes
//! the connection from here to build a peer client, and relay handlers
//! forward the raw frame so the recipient sees the sender's bytes
//! untouched.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;

use super::engine::Connection;

/// Context passed to message handlers
#[derive(Clone)]
pub struct RequestContext {
    connection: Arc<Connection>,
    frame: Bytes,
}

impl RequestContext {
    /// Create a context for one inbound frame
    pub fn new(connection: Arc<Connection>, frame: Bytes) -> Self {
        Self { connection, frame }
    }

    /// The connection the frame arrived on
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Raw inbound frame, exactly as received
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    /// Transport-level id of the connection
    pub fn connection_id(&self) -> &str {
        self.connection.id()
    }

    /// Remote peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_addr()
    }
}
