//! WebSocket signaling server
//!
//! Accepts TCP connections, upgrades them on the `/ws` endpoint, and
//! hands each one to the connection engine.

pub mod listener;

pub use listener::SignalServer;
