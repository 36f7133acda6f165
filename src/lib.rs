//! # conic
//!
//! WebRTC signaling relay. Peers connect over WebSocket, register under
//! a stable id, and exchange envelope-wrapped SDP, ICE candidate, and
//! data-channel messages addressed to other registered peers; the relay
//! forwards each envelope verbatim to its recipient.
//!
//! # Architecture
//!
//! ```text
//!   peer ──ws──► Connection ──► Router ──► handlers ──► Hub ─┐
//!                    ▲                                       │
//!                    └──────────── send queue ◄──────────────┘
//! ```
//!
//! - [`connection`] runs the per-peer read/write pumps with deadlines,
//!   keepalive, and a bounded send queue.
//! - [`hub`] is a single-writer actor owning the peer registry; all
//!   registration and routing decisions go through its worker.
//! - [`signaling`] binds the protocol to the hub: registration plus the
//!   verbatim relay handlers.
//! - [`server`] accepts connections and upgrades them on `/ws`.
//! - [`client`] is the peer-side counterpart used to talk to a relay.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod signaling;

pub use config::Config;
pub use error::{Error, Result};
pub use hub::{Hub, HubStats};
pub use protocol::{Envelope, MessageType};
pub use server::SignalServer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
