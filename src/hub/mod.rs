//! Central hub: peer registry and message routing
//!
//! The hub owns the registry of connected peers and serializes every
//! registration and routing decision through a single worker task:
//!
//! ```text
//!             register ──┐
//!           unregister ──┤
//!            broadcast ──┼──► worker ──► registry (DashMap)
//!              send_to ──┘       │
//!                                └──► client.send() ──► connection queue
//! ```
//!
//! Producers enqueue without blocking; the worker is the only mutator
//! of the registry, which makes "at most one client per id" and
//! "remove exactly once" fall out of the queue ordering instead of
//! lock discipline. Deliveries go through each connection's bounded
//! send queue, so transport latency never reaches the worker.

pub mod client;
pub mod events;
pub mod stats;
pub mod store;

pub use client::Client;
pub use events::HubEvent;
pub use stats::HubStats;
pub use store::{Hub, HubOptions};
