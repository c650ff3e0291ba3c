//! # Body Serialization Formats
//!
//! Abstraction over the formats a packet body can be encoded with inside an envelope.
//!
//! ## Formats
//! - **JSON** (default): field-named, human-readable; the interoperable choice
//! - **Bincode**: compact binary, fastest
//! - **MessagePack**: compact binary, self-describing
//!
//! Both peers must agree on the format; it is not signalled on the wire.
//!
//! ## Usage
//! ```rust
//! use packet_tcp::core::serialization::SerializationFormat;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Chat { text: String }
//!
//! let format = SerializationFormat::Json;
//! let bytes = format.serialize(&Chat { text: "hi".into() }).unwrap();
//! assert_eq!(bytes, br#"{"text":"hi"}"#);
//! let back: Chat = format.deserialize(&bytes).unwrap();
//! assert_eq!(back.text, "hi");
//! ```

use crate::error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Supported body serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Field-named JSON (default)
    #[default]
    Json,
    /// Binary compact format
    Bincode,
    /// Compact binary format (MessagePack, named fields)
    #[serde(alias = "msgpack")]
    MessagePack,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Json => "JSON",
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::MessagePack => "MessagePack",
        }
    }

    /// Serialize a packet body
    pub fn serialize<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationFormat::Json => {
                serde_json::to_vec(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
            }
            SerializationFormat::Bincode => {
                bincode::serialize(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
            }
            SerializationFormat::MessagePack => rmp_serde::to_vec_named(value)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
        }
    }

    /// Deserialize a packet body
    pub fn deserialize<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::MessagePack => rmp_serde::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
        }
    }
}
