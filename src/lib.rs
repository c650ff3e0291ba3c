//! # packet-tcp
//!
//! Typed packet messaging over raw TCP.
//!
//! Applications register their message types once in a [`TypeRegistry`], then exchange
//! them between a [`Client`] and a [`Server`] as length-prefixed frames. Every packet
//! carries a 128-bit correlation id, so a request can wait for the reply that answers
//! it while unrelated traffic keeps flowing on the same connection.
//!
//! ## Layers
//! - [`core`]: framing, envelope encoding, wire ids, and the type registry
//! - [`crypto`]: optional whole-envelope encryption (AES-256-CBC or RSA)
//! - [`protocol`]: packet events, per-type handlers, identity sync
//! - [`transport`]: the per-connection engine, outbound queue, and hooks
//! - [`service`]: client and server roles
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging, metrics
//!
//! ## Example
//! ```no_run
//! use packet_tcp::{Client, NetworkConfig, Server, TypeRegistry};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Ping {
//!     seq: u32,
//! }
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Pong {
//!     seq: u32,
//! }
//!
//! # async fn run() -> packet_tcp::Result<()> {
//! let mut registry = TypeRegistry::new();
//! registry.register::<Ping>("example.Ping")?;
//! registry.register::<Pong>("example.Pong")?;
//! let registry = Arc::new(registry);
//!
//! let config = NetworkConfig::default();
//! let server = Server::bind(&config, registry.clone()).await?;
//! server.on(|ctx, ping: &Ping| {
//!     ctx.reply(Pong { seq: ping.seq })?;
//!     Ok(())
//! })?;
//! server.start()?;
//!
//! let client = Client::connect(&config, registry).await?;
//! let pong = client.request::<Ping, Pong>(Ping { seq: 1 }).await?;
//! assert_eq!(pong.map(|p| p.seq), Some(1));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::envelope::EnvelopeCodec;
pub use crate::core::framer::StreamFramer;
pub use crate::core::ids::{ConnectionId, CorrelationId, PacketId};
pub use crate::core::registry::{Packet, TypeRegistry};
pub use crate::crypto::{AsymmetricCrypto, CryptoConfig, CryptoProvider, SymmetricCrypto};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::dispatcher::{HandlerId, RequestContext};
pub use crate::protocol::event::{ConnectionInfo, Origin, PacketEvent};
pub use crate::service::{Client, Server};
pub use crate::transport::{Connection, ConnectionState, Hooks, SendReceipt};
