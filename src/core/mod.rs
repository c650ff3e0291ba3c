//! # Core Protocol Components
//!
//! Framing, envelope encoding, wire identifiers, and the packet type registry.
//!
//! ## Components
//! - **Framer**: recovers length-prefixed frames from arbitrary read chunks
//! - **Envelope**: typed packet <-> (optionally encrypted) frame payload
//! - **Registry**: 16-byte wire id <-> packet type
//! - **Serialization**: body formats (JSON, Bincode, MessagePack)
//!
//! ## Wire Format
//! ```text
//! [frameLength: u32 LE] [typeId(16)] [correlationId(16)] [bodyLength: u32 LE] [body]
//! ```
//! Everything after `frameLength` is encrypted as one block when crypto is enabled.
//!
//! ## Limits
//! - Minimum frame payload: 48 bytes
//! - Maximum frame payload: `transport.max_frame_size` (4096 by default)

pub mod envelope;
pub mod framer;
pub mod ids;
pub mod registry;
pub mod serialization;
