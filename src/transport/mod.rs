//! # Transport Layer
//!
//! Per-connection I/O engine over a single TCP stream.
//!
//! ## Components
//! - **Connection**: receive and send loops, request/response correlation, lifecycle
//! - **Queue**: bounded outbound queue, fail-fast when full
//! - **Pending**: correlation table of requests awaiting a reply
//! - **Hooks**: connected, disconnected, received, sending, and sent observers
//!
//! ## Ordering
//! Frames are written in enqueue order per connection and surfaced in wire order.
//! Nothing is ordered across connections.

pub mod connection;
pub mod hooks;
pub(crate) mod pending;
pub(crate) mod queue;

pub use connection::{Connection, ConnectionState, SendReceipt};
pub use hooks::Hooks;
