//! Signaling layer: peer clients and message handlers
//!
//! Binds the protocol to the hub. Registration turns a bare connection
//! into a registered peer client; the relay handlers forward envelopes
//! between registered peers without parsing their payloads.

use std::sync::Arc;

use crate::hub::Hub;
use crate::protocol::{HandlerRegistry, MessageType, Router};

pub mod client;
pub mod handlers;

pub use client::PeerClient;
pub use handlers::{
    DataChannelHandler, IceCandidateHandler, RegisterHandler, SdpHandler, UnregisterHandler,
};

/// Build the router serving the full signaling protocol
///
/// All handlers are registered before the router is returned, so the
/// registry is never mutated while serving.
pub fn router(hub: Arc<Hub>) -> Router {
    let mut registry = HandlerRegistry::new();

    registry.register(
        MessageType::RegisterRequest,
        Arc::new(RegisterHandler::new(Arc::clone(&hub))),
    );
    registry.register(
        MessageType::UnregisterRequest,
        Arc::new(UnregisterHandler::new(Arc::clone(&hub))),
    );
    registry.register(MessageType::Sdp, Arc::new(SdpHandler::new(Arc::clone(&hub))));
    registry.register(
        MessageType::Candidate,
        Arc::new(IceCandidateHandler::new(Arc::clone(&hub))),
    );
    registry.register(
        MessageType::DataChannel,
        Arc::new(DataChannelHandler::new(hub)),
    );

    Router::new(registry)
}
