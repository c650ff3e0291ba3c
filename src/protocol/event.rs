//! Events raised for every packet that crosses a connection, in either direction.

use crate::core::envelope::DecodedPacket;
use crate::core::ids::{ConnectionId, CorrelationId, PacketId};
use crate::core::registry::PacketPayload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which side of a connection produced a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Client,
    Server,
}

impl Origin {
    /// The other end of the connection.
    pub fn peer(self) -> Self {
        match self {
            Origin::Client => Origin::Server,
            Origin::Server => Origin::Client,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::Client => "client",
            Origin::Server => "server",
        })
    }
}

/// Identity and peer address of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
}

/// Shared cancellation flag. A reply shares the flag of the event it answers.
pub(crate) type CancelFlag = Arc<AtomicBool>;

/// A packet received from, or about to be sent to, a peer.
///
/// Clones share the payload and the cancellation flag: cancelling any clone
/// cancels them all. Cancelling an outbound event before the send loop reaches
/// it keeps it off the wire; cancelling an inbound event suppresses every reply
/// built from it.
#[derive(Clone)]
pub struct PacketEvent {
    packet_id: PacketId,
    name: Arc<str>,
    correlation_id: CorrelationId,
    connection: ConnectionInfo,
    origin: Origin,
    payload: PacketPayload,
    cancelled: CancelFlag,
}

impl PacketEvent {
    pub(crate) fn new(
        packet_id: PacketId,
        name: Arc<str>,
        correlation_id: CorrelationId,
        connection: ConnectionInfo,
        origin: Origin,
        payload: PacketPayload,
        cancelled: CancelFlag,
    ) -> Self {
        Self {
            packet_id,
            name,
            correlation_id,
            connection,
            origin,
            payload,
            cancelled,
        }
    }

    pub(crate) fn inbound(
        decoded: DecodedPacket,
        connection: ConnectionInfo,
        origin: Origin,
    ) -> Self {
        Self::new(
            decoded.packet_id,
            decoded.name,
            decoded.correlation_id,
            connection,
            origin,
            decoded.payload,
            CancelFlag::default(),
        )
    }

    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Name the packet type was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn payload(&self) -> &PacketPayload {
        &self.payload
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Borrow the packet as `T`, if that is its type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Shared handle to the packet as `T`, if that is its type.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.cancelled)
    }
}

impl fmt::Debug for PacketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketEvent")
            .field("name", &self.name)
            .field("packet_id", &self.packet_id)
            .field("correlation_id", &self.correlation_id)
            .field("connection", &self.connection.id)
            .field("origin", &self.origin)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> PacketEvent {
        PacketEvent::new(
            PacketId::from_name("Note"),
            Arc::from("Note"),
            CorrelationId::new(),
            ConnectionInfo {
                id: ConnectionId::new(),
                peer_addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            },
            Origin::Client,
            Arc::new(String::from("hello")),
            CancelFlag::default(),
        )
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let original = event();
        let copy = original.clone();
        assert!(!copy.is_cancelled());
        original.cancel();
        assert!(copy.is_cancelled());
    }

    #[test]
    fn test_downcasts() {
        let event = event();
        assert!(event.is::<String>());
        assert_eq!(event.downcast_ref::<String>().map(String::as_str), Some("hello"));
        assert!(event.downcast::<u32>().is_none());
        assert_eq!(event.downcast::<String>().as_deref().map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_origin_peer() {
        assert_eq!(Origin::Client.peer(), Origin::Server);
        assert_eq!(Origin::Server.to_string(), "server");
    }
}
