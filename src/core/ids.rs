//! 128-bit identifiers carried on the wire.
//!
//! All three are UUIDs underneath and serialize as their 16 raw bytes in
//! RFC 4122 order inside an envelope.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Namespace for name-derived packet ids.
const PACKET_NAMESPACE: Uuid = Uuid::from_u128(0x7061_636b_6574_2d74_6370_2d69_6473_0001);

macro_rules! wire_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap raw bytes read from the wire.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Bytes as written to the wire.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

wire_id!(
    /// Wire identifier of a registered packet type.
    PacketId
);

wire_id!(
    /// Links a request to its reply. Assigned once per logical request.
    CorrelationId
);

wire_id!(
    /// Identity of one live connection.
    ConnectionId
);

impl PacketId {
    /// Stable id derived from a packet name (UUID v5).
    ///
    /// Both peers derive the same id as long as they register the type under
    /// the same name.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&PACKET_NAMESPACE, name.as_bytes()))
    }
}

impl CorrelationId {
    /// Fresh random correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionId {
    /// Fresh random identity, assigned by the server per accepted socket.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Identity of a client that did not sync with the server.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::nil()
    }
}
