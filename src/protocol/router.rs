//! Envelope router
//!
//! Owns the handler registry and dispatches each decoded envelope to the
//! handler registered for its type.

use crate::connection::RequestContext;
use crate::error::Result;
use crate::protocol::handler::HandlerRegistry;
use crate::protocol::message::Envelope;

/// Dispatches envelopes to registered handlers
pub struct Router {
    registry: HandlerRegistry,
}

impl Router {
    /// Create a router serving the given registry
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    /// Route an envelope to its handler, returning any response envelope
    ///
    /// Returns [`crate::Error::UnknownMessageType`] when no handler is
    /// registered for the envelope's type.
    pub async fn handle(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
    ) -> Result<Option<Envelope>> {
        tracing::debug!(
            message_type = %envelope.message_type,
            envelope_id = %envelope.id,
            connection_id = %ctx.connection_id(),
            "routing envelope"
        );

        self.registry.handle(ctx, envelope).await
    }
}
