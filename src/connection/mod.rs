//! Per-peer connection engine
//!
//! Each accepted WebSocket is wrapped by a [`Connection`] running a read
//! pump and a write pump:
//!
//! ```text
//!   transport ──► read pump ──► decode ──► Router ──► handler
//!                                                        │
//!   transport ◄── write pump ◄── send queue ◄── send() ◄─┘
//! ```
//!
//! The send queue is bounded and offered to without blocking, so a slow
//! peer saturates only its own queue and never stalls the hub worker.

pub mod context;
pub mod engine;
pub mod options;

pub use context::RequestContext;
pub use engine::Connection;
pub use options::ConnectionOptions;
