//! # Error Types
//!
//! Error handling for every layer of the packet protocol.
//!
//! This module defines all error variants that can occur during protocol operations,
//! from socket failures up to registry and correlation violations.
//!
//! ## Error Categories
//! - **Transport Errors**: socket failures, closed connections, accept limits
//! - **Codec Errors**: unregistered packet types, malformed envelopes, body (de)serialization
//! - **Cryptographic Errors**: encryption/decryption failures, bad key material
//! - **Flow Errors**: outbound queue overflow, duplicate correlation ids
//! - **Handshake Errors**: identity sync timed out or the connection dropped during connect
//!
//! A request that simply receives no reply before its deadline is *not* an error:
//! `send_and_await` returns `Ok(None)` in that case.
//!
//! ## Example Usage
//! ```rust
//! use packet_tcp::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn frame_len(bytes: &[u8]) -> Result<u32> {
//!     let prefix: [u8; 4] = bytes
//!         .get(..4)
//!         .and_then(|b| b.try_into().ok())
//!         .ok_or(ProtocolError::InvalidPacket("missing length prefix".into()))?;
//!     Ok(u32::from_le_bytes(prefix))
//! }
//!
//! match frame_len(&[48, 0, 0, 0]) {
//!     Ok(len) => info!(len, "frame length"),
//!     Err(e) => error!(error = %e, "bad frame"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lock poisoning
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_HOOKS_LOCK: &str = "Failed to acquire lock on event hooks";
    pub const ERR_PENDING_LOCK: &str = "Failed to acquire lock on pending request table";
    pub const ERR_CLIENTS_LOCK: &str = "Failed to acquire lock on client table";
    pub const ERR_SERVER_STATE_LOCK: &str = "Failed to acquire lock on server state";

    /// Envelope validation
    pub const ERR_SHORT_ENVELOPE: &str = "Envelope shorter than its fixed header";
    pub const ERR_BODY_OVERRUN: &str = "Envelope body length exceeds envelope size";

    /// Connection errors
    pub const ERR_NOT_CONNECTED: &str = "Connection is not open";
    pub const ERR_IDENTITY_SYNC: &str = "Server did not assign a client identity";
    pub const ERR_ALREADY_STARTED: &str = "Server accept loop already started";
    pub const ERR_UNKNOWN_CLIENT: &str = "No connected client with that identity";

    /// Cryptographic errors
    pub const ERR_KEY_LENGTH: &str = "Key or IV has the wrong length";
    pub const ERR_MISSING_PRIVATE_KEY: &str = "Private key required for decryption";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Packet type is not registered: {0}")]
    UnregisteredType(String),

    #[error("Unknown packet id on the wire: {0}")]
    UnknownPacketId(String),

    #[error("Packet registered twice: {0}")]
    DuplicateRegistration(String),

    #[error("Invalid packet structure: {0}")]
    InvalidPacket(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Outbound queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("A request with correlation id {0} is already pending")]
    DuplicateCorrelation(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server is at its connection limit ({0})")]
    ServerFull(usize),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether a read failure on the client should be retried instead of closing.
    pub fn is_transient_io(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
