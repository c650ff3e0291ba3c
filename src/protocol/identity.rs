//! Identity-sync handshake.
//!
//! When `transport.identity_sync` is enabled, a freshly connected client sends an
//! [`IdentityRequest`] and waits for the [`IdentityAssignment`] correlated to it. The
//! server answers with the identity it gave the connection at accept time. If no
//! assignment arrives before `client.handshake_timeout`, connecting fails.
//!
//! Both packets are pre-registered in every [`TypeRegistry`](crate::core::registry::TypeRegistry)
//! under fixed ids, so applications never register them.

use crate::core::ids::{ConnectionId, PacketId};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::RequestContext;
use crate::transport::connection::Connection;
use crate::utils::metrics::global_metrics;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Client hello asking for an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRequest {}

impl IdentityRequest {
    pub const PACKET_ID: PacketId = PacketId::from_bytes(*b"packet-tcp:idreq");
}

/// Server reply carrying the identity assigned to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAssignment {
    pub client_id: ConnectionId,
}

impl IdentityAssignment {
    pub const PACKET_ID: PacketId = PacketId::from_bytes(*b"packet-tcp:idasn");
}

/// Server-side handler: echo the connection's identity back to the client.
pub(crate) fn respond(ctx: &RequestContext, _request: &IdentityRequest) -> Result<()> {
    let client_id = ctx.connection_id();
    debug!(connection = %client_id, "Assigning client identity");
    ctx.reply(IdentityAssignment { client_id })?;
    Ok(())
}

/// Client side: request an identity and wait for it.
#[instrument(skip(connection), fields(peer = %connection.peer_addr()))]
pub(crate) async fn synchronize(
    connection: &Connection,
    timeout: Duration,
) -> Result<ConnectionId> {
    global_metrics().identity_sync_started();

    let outcome = connection
        .request::<IdentityRequest, IdentityAssignment>(IdentityRequest {}, Some(timeout))
        .await;

    match outcome {
        Ok(Some(assignment)) if !assignment.client_id.is_nil() => {
            debug!(identity = %assignment.client_id, "Identity assigned");
            Ok(assignment.client_id)
        }
        Ok(_) => {
            global_metrics().identity_sync_failed();
            warn!(timeout_ms = timeout.as_millis() as u64, "{}", constants::ERR_IDENTITY_SYNC);
            Err(ProtocolError::HandshakeError(constants::ERR_IDENTITY_SYNC.into()))
        }
        Err(e) => {
            global_metrics().identity_sync_failed();
            warn!(error = %e, "Identity sync failed");
            Err(ProtocolError::HandshakeError(e.to_string()))
        }
    }
}
