//! Peer client
//!
//! Server-side handle for one registered peer: a stable id bound to the
//! connection it arrived on. Created by the register handler, owned by
//! the hub until unregistration or connection close.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection::Connection;
use crate::error::Result;
use crate::hub::Client;

/// A registered peer bound to its connection
pub struct PeerClient {
    id: String,
    connection: Arc<Connection>,
}

impl PeerClient {
    /// Bind an id to a connection
    pub fn new(id: String, connection: Arc<Connection>) -> Self {
        Self { id, connection }
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

#[async_trait]
impl Client for PeerClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, message: Bytes) -> Result<()> {
        self.connection.send(message)
    }

    // Begin shutdown without joining the pumps: this runs on the hub
    // worker, and a read pump may itself be waiting on that worker for
    // a registration verdict. The accept task owning the connection
    // performs the join.
    async fn close(&self) {
        self.connection.shutdown();
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}
