//! # Client
//!
//! Single outbound connection to a packet server.
//!
//! `connect` opens the socket under `client.connect_timeout`, starts the connection
//! loops and, when `transport.identity_sync` is enabled, waits for the server to assign
//! an identity before returning. The connected hooks fire only once that is done.

use crate::config::{ClientConfig, NetworkConfig};
use crate::core::envelope::EnvelopeCodec;
use crate::core::ids::ConnectionId;
use crate::core::registry::{Packet, TypeRegistry};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, HandlerId, RequestContext};
use crate::protocol::event::{Origin, PacketEvent};
use crate::protocol::identity;
use crate::transport::connection::{Connection, ConnectionSetup, ConnectionState, SendReceipt};
use crate::transport::hooks::Hooks;
use crate::utils::timeout::with_timeout_error;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, instrument, warn};

pub struct Client {
    connection: Connection,
    hooks: Arc<Hooks>,
    dispatcher: Arc<Dispatcher>,
    config: ClientConfig,
}

impl Client {
    /// Connect with a fresh, empty set of hooks.
    pub async fn connect(config: &NetworkConfig, registry: Arc<TypeRegistry>) -> Result<Self> {
        Self::connect_with_hooks(config, registry, Arc::new(Hooks::new())).await
    }

    /// Connect with hooks registered up front, so `on_connected` and early
    /// `on_received` callbacks observe the whole connection.
    #[instrument(skip(config, registry, hooks), fields(address = %config.client.address))]
    pub async fn connect_with_hooks(
        config: &NetworkConfig,
        registry: Arc<TypeRegistry>,
        hooks: Arc<Hooks>,
    ) -> Result<Self> {
        config.validate_client_strict()?;

        let codec = Arc::new(EnvelopeCodec::from_config(registry.clone(), &config.transport)?);
        let dispatcher = Arc::new(Dispatcher::new(registry));
        let address = config.client.address.as_str();
        let stream = with_timeout_error(
            async { TcpStream::connect(address).await.map_err(ProtocolError::from) },
            config.client.connect_timeout,
        )
        .await?;

        let setup = ConnectionSetup {
            identity: None,
            role: Origin::Client,
            queue_depth: config.client.max_outbound_queue_depth,
            retry_transient_reads: true,
            codec,
            hooks: Arc::clone(&hooks),
            dispatcher: Some(Arc::clone(&dispatcher)),
            teardown: None,
        };
        let (connection, driver) = Connection::new(stream, setup)?;
        driver.spawn();

        if config.transport.identity_sync {
            match identity::synchronize(&connection, config.client.handshake_timeout).await {
                Ok(id) => connection.assign_identity(id)?,
                Err(e) => {
                    warn!(error = %e, "Closing connection after failed identity sync");
                    connection.close();
                    return Err(e);
                }
            }
        }

        info!(
            identity = %connection.id(),
            peer = %connection.peer_addr(),
            "Connected to server"
        );
        hooks.emit_connected(&connection.info());

        Ok(Self {
            connection,
            hooks,
            dispatcher,
            config: config.client.clone(),
        })
    }

    /// Identity assigned by the server; nil without identity sync.
    pub fn identity(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.hooks
    }

    /// Run `handler` for every `T` the server pushes.
    pub fn on<T, F>(&self, handler: F) -> Result<HandlerId>
    where
        T: Packet,
        F: Fn(&RequestContext, &T) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.register(handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> Result<bool> {
        self.dispatcher.remove(id)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.state() == ConnectionState::Open
    }

    /// See [`Connection::send`].
    pub fn send<T: Packet>(&self, packet: T) -> Result<SendReceipt> {
        self.connection.send(packet)
    }

    /// See [`Connection::reply`].
    pub fn reply<T: Packet>(
        &self,
        request: &PacketEvent,
        packet: T,
    ) -> Result<Option<SendReceipt>> {
        self.connection.reply(request, packet)
    }

    /// See [`Connection::send_and_await`].
    pub async fn send_and_await<T: Packet>(
        &self,
        packet: T,
        timeout: Option<Duration>,
    ) -> Result<Option<PacketEvent>> {
        self.connection.send_and_await(packet, timeout).await
    }

    /// Typed request under `client.request_timeout`. `Ok(None)` when no reply came.
    pub async fn request<Req: Packet, Resp: Packet>(
        &self,
        request: Req,
    ) -> Result<Option<Arc<Resp>>> {
        self.connection
            .request(request, Some(self.config.request_timeout))
            .await
    }

    pub fn close(&self) {
        self.connection.close();
    }

    /// Wait until the connection is fully closed, by either side.
    pub async fn join(&self) {
        self.connection.closed().await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.connection.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
