//! # Protocol Layer
//!
//! Packet events, per-type handler dispatch, and the identity-sync handshake.
//!
//! ## Components
//! - **Event**: [`PacketEvent`](event::PacketEvent) raised for every packet in either direction
//! - **Dispatcher**: handlers keyed by wire id, run in registration order
//! - **Identity**: optional handshake assigning a server-side identity to a client

pub mod dispatcher;
pub mod event;
pub mod identity;
