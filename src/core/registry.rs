//! # Type Registry
//!
//! Bidirectional map between 16-byte wire identifiers and packet types.
//!
//! Every packet type must be registered, on both peers, before any traffic flows:
//! an unknown id on receive or an unregistered type on send is a hard failure.
//! Registration is explicit; there is no runtime type discovery.
//!
//! The registry is built mutably during setup, then shared read-only behind an
//! `Arc` by every connection, so lookups on the hot path take no locks.
//!
//! ```rust
//! use packet_tcp::core::registry::TypeRegistry;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping {}
//!
//! let mut registry = TypeRegistry::new();
//! let id = registry.register::<Ping>("Ping").unwrap();
//! assert_eq!(registry.id_of::<Ping>().unwrap(), id);
//! ```

use crate::core::ids::PacketId;
use crate::core::serialization::SerializationFormat;
use crate::error::{ProtocolError, Result};
use crate::protocol::identity::{IdentityAssignment, IdentityRequest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Anything that can travel inside an envelope.
pub trait Packet: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Packet for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Type-erased packet value produced by decoding.
pub type PacketPayload = Arc<dyn Any + Send + Sync>;

type BodyDecoder = fn(SerializationFormat, &[u8]) -> Result<PacketPayload>;

fn decode_body<T: Packet>(format: SerializationFormat, body: &[u8]) -> Result<PacketPayload> {
    let value: T = format.deserialize(body)?;
    Ok(Arc::new(value))
}

/// A registered packet type plus its wire identifier.
#[derive(Clone)]
pub struct TypeDescriptor {
    id: PacketId,
    name: Arc<str>,
    type_id: TypeId,
    type_name: &'static str,
    decode: BodyDecoder,
}

impl TypeDescriptor {
    fn of<T: Packet>(id: PacketId, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: decode_body::<T>,
        }
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    /// Name the type was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Rust type name, for logs.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Deserialize a body into this descriptor's type.
    pub fn decode(&self, format: SerializationFormat, body: &[u8]) -> Result<PacketPayload> {
        (self.decode)(format, body)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Wire id <-> packet type map.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    by_id: HashMap<PacketId, TypeDescriptor>,
    by_type: HashMap<TypeId, PacketId>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Registry holding only the built-in identity-sync packets.
    pub fn new() -> Self {
        let mut registry = Self {
            by_id: HashMap::new(),
            by_type: HashMap::new(),
        };
        registry.insert(TypeDescriptor::of::<IdentityRequest>(
            IdentityRequest::PACKET_ID,
            "packet_tcp.IdentityRequest",
        ));
        registry.insert(TypeDescriptor::of::<IdentityAssignment>(
            IdentityAssignment::PACKET_ID,
            "packet_tcp.IdentityAssignment",
        ));
        registry
    }

    fn insert(&mut self, descriptor: TypeDescriptor) {
        self.by_type.insert(descriptor.type_id, descriptor.id);
        self.by_id.insert(descriptor.id, descriptor);
    }

    /// Register `T` under an id derived from `name`.
    pub fn register<T: Packet>(&mut self, name: &str) -> Result<PacketId> {
        let id = PacketId::from_name(name);
        self.register_as::<T>(id, name)?;
        Ok(id)
    }

    /// Register `T` under an explicit wire id.
    pub fn register_with_id<T: Packet>(&mut self, id: PacketId) -> Result<()> {
        self.register_as::<T>(id, std::any::type_name::<T>())
    }

    fn register_as<T: Packet>(&mut self, id: PacketId, name: &str) -> Result<()> {
        if let Some(existing) = self.by_id.get(&id) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "id {id} already maps to {}",
                existing.type_name
            )));
        }
        if self.by_type.contains_key(&TypeId::of::<T>()) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "type {} already registered",
                std::any::type_name::<T>()
            )));
        }
        self.insert(TypeDescriptor::of::<T>(id, name));
        Ok(())
    }

    /// Wire id of `T`; fails if `T` was never registered.
    pub fn id_of<T: 'static>(&self) -> Result<PacketId> {
        self.by_type
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or_else(|| ProtocolError::UnregisteredType(std::any::type_name::<T>().into()))
    }

    /// Descriptor for a wire id; fails if the id is unknown.
    pub fn descriptor(&self, id: &PacketId) -> Result<&TypeDescriptor> {
        self.by_id
            .get(id)
            .ok_or_else(|| ProtocolError::UnknownPacketId(id.to_string()))
    }

    pub fn contains(&self, id: &PacketId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Number of registered types, built-ins included.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
