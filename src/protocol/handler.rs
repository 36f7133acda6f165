//! Handler seam between the router and the signaling logic
//!
//! A handler owns the semantics of one or more message types. Handlers
//! run on the connection's read pump, so they must be reentrant and
//! must never block on peer I/O: side effects go through non-blocking
//! hub enqueues, awaiting at most the hub worker's bounded
//! acknowledgement.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::RequestContext;
use crate::error::{Error, Result};
use crate::protocol::message::{Envelope, MessageType};

/// Processes envelopes of a specific type
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle an envelope, optionally producing a response for the sender
    async fn handle(&self, ctx: &RequestContext, envelope: &Envelope) -> Result<Option<Envelope>>;

    /// Whether this handler accepts the given message type
    fn can_handle(&self, message_type: MessageType) -> bool;
}

/// Mapping from message type to handler
///
/// Registration completes before the router starts serving; the registry
/// is never mutated afterwards, so lookups need no synchronization.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type
    pub fn register(&mut self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(message_type, handler);
    }

    /// Look up the handler for a message type
    pub fn get(&self, message_type: MessageType) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(&message_type)
    }

    /// Dispatch an envelope to its handler
    pub async fn handle(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
    ) -> Result<Option<Envelope>> {
        let handler = self
            .get(envelope.message_type)
            .ok_or(Error::UnknownMessageType(envelope.message_type))?;

        handler.handle(ctx, envelope).await
    }
}
