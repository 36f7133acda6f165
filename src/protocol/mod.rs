//! Wire protocol: envelopes, handler seam, and routing
//!
//! The relay speaks JSON envelopes over a framed transport. This module
//! owns the envelope codec, the closed set of message types, the typed
//! payload schemas, and the router that dispatches decoded envelopes to
//! registered handlers. Payloads stay opaque at the envelope layer so
//! relaying never re-encodes what a peer sent.

pub mod handler;
pub mod message;
pub mod router;

pub use handler::{HandlerRegistry, MessageHandler};
pub use message::{
    DataChannelMessage, Envelope, IceCandidateMessage, MessageType, RegisterRequest,
    RegisterResponse, SdpMessage, UnregisterRequest, UnregisterResponse,
};
pub use router::Router;
