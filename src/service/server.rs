//! # Server
//!
//! Accepts TCP connections, gives each one a fresh [`ConnectionId`], keeps the
//! identity table of live connections and routes inbound packets to per-type
//! handlers.
//!
//! ```text
//! bind -> register handlers/hooks -> start -> ... -> shutdown
//! ```
//!
//! A connection is in the table from the moment it is accepted until it reaches
//! `Closed`; it is removed before the disconnected hooks fire. Sockets accepted
//! while `server.max_connections` connections are live are dropped immediately.

use crate::config::{NetworkConfig, ServerConfig, TransportConfig};
use crate::core::envelope::EnvelopeCodec;
use crate::core::ids::ConnectionId;
use crate::core::registry::{Packet, TypeRegistry};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, HandlerId, RequestContext};
use crate::protocol::event::{ConnectionInfo, Origin};
use crate::protocol::identity;
use crate::transport::connection::{Connection, ConnectionSetup, SendReceipt};
use crate::transport::hooks::Hooks;
use crate::utils::metrics::{global_metrics, Timer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

struct ServerInner {
    config: ServerConfig,
    transport: TransportConfig,
    codec: Arc<EnvelopeCodec>,
    dispatcher: Arc<Dispatcher>,
    hooks: Arc<Hooks>,
    clients: Mutex<HashMap<ConnectionId, Connection>>,
    listener: Mutex<Option<TcpListener>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Bind the listen socket. Nothing is accepted until [`start`](Self::start).
    ///
    /// With `transport.identity_sync` enabled, the identity responder is registered
    /// as a handler for [`IdentityRequest`](identity::IdentityRequest).
    #[instrument(skip(config, registry), fields(address = %config.server.address))]
    pub async fn bind(config: &NetworkConfig, registry: Arc<TypeRegistry>) -> Result<Self> {
        config.validate_server_strict()?;
        let codec = Arc::new(EnvelopeCodec::from_config(registry.clone(), &config.transport)?);

        let address: SocketAddr = config.server.address.parse().map_err(|e| {
            ProtocolError::ConfigError(format!("Invalid server address: {e}"))
        })?;
        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(address)?;
        let backlog = u32::try_from(config.server.max_connections).unwrap_or(u32::MAX);
        let listener = socket.listen(backlog)?;
        let local_addr = listener.local_addr()?;

        let dispatcher = Arc::new(Dispatcher::new(registry));
        if config.transport.identity_sync {
            dispatcher.register::<identity::IdentityRequest, _>(identity::respond)?;
        }

        info!(
            %local_addr,
            max_connections = config.server.max_connections,
            encrypted = codec.is_encrypted(),
            identity_sync = config.transport.identity_sync,
            "Server bound"
        );

        Ok(Self {
            inner: Arc::new(ServerInner {
                config: config.server.clone(),
                transport: config.transport.clone(),
                codec,
                dispatcher,
                hooks: Arc::new(Hooks::new()),
                clients: Mutex::new(HashMap::new()),
                listener: Mutex::new(Some(listener)),
                accept_task: Mutex::new(None),
                local_addr,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Spawn the accept loop. Fails if called twice.
    pub fn start(&self) -> Result<()> {
        let listener = self
            .inner
            .lock_state(&self.inner.listener)?
            .take()
            .ok_or_else(|| ProtocolError::Custom(constants::ERR_ALREADY_STARTED.to_string()))?;

        let task = tokio::spawn(accept_loop(Arc::clone(&self.inner), listener));
        *self.inner.lock_state(&self.inner.accept_task)? = Some(task);
        info!(local_addr = %self.inner.local_addr, "Server accepting connections");
        Ok(())
    }

    /// True between [`start`](Self::start) and [`shutdown`](Self::shutdown).
    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
            && self
                .inner
                .accept_task
                .lock()
                .map(|task| task.is_some())
                .unwrap_or(false)
    }

    /// Run `handler` for every inbound `T` on any connection.
    pub fn on<T, F>(&self, handler: F) -> Result<HandlerId>
    where
        T: Packet,
        F: Fn(&RequestContext, &T) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register(handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> Result<bool> {
        self.inner.dispatcher.remove(id)
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.inner.hooks
    }

    /// Snapshot of the live connections.
    pub fn clients(&self) -> Result<Vec<ConnectionInfo>> {
        Ok(self
            .inner
            .lock_clients()?
            .values()
            .map(Connection::info)
            .collect())
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn client(&self, id: ConnectionId) -> Option<Connection> {
        self.inner
            .clients
            .lock()
            .ok()
            .and_then(|clients| clients.get(&id).cloned())
    }

    /// Queue `packet` for one client.
    pub fn send_to<T: Packet>(&self, id: ConnectionId, packet: T) -> Result<SendReceipt> {
        let connection = self.client(id).ok_or_else(|| {
            debug!(connection = %id, "{}", constants::ERR_UNKNOWN_CLIENT);
            ProtocolError::ConnectionClosed
        })?;
        connection.send(packet)
    }

    /// Queue `packet` for every live client. Returns how many accepted it; a full
    /// or closing connection is skipped.
    pub fn broadcast<T: Packet + Clone>(&self, packet: T) -> Result<usize> {
        let connections: Vec<Connection> = self.inner.lock_clients()?.values().cloned().collect();

        let mut queued = 0;
        for connection in &connections {
            match connection.send(packet.clone()) {
                Ok(_) => queued += 1,
                Err(e) => {
                    debug!(connection = %connection.id(), error = %e, "Broadcast skipped client")
                }
            }
        }
        Ok(queued)
    }

    /// Stop accepting, close every connection and wait for them to reach `Closed`,
    /// up to `server.shutdown_timeout`.
    #[instrument(skip(self), fields(local_addr = %self.inner.local_addr))]
    pub async fn shutdown(&self) -> Result<()> {
        let _timer = Timer::start("server_shutdown");
        self.inner.shutdown.cancel();

        let listener = self.inner.lock_state(&self.inner.listener)?.take();
        drop(listener);
        let accept_task = self.inner.lock_state(&self.inner.accept_task)?.take();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }

        let connections: Vec<Connection> = self.inner.lock_clients()?.values().cloned().collect();
        for connection in &connections {
            connection.close();
        }

        let all_closed = futures::future::join_all(connections.iter().map(|c| c.closed()));
        match tokio::time::timeout(self.inner.config.shutdown_timeout, all_closed).await {
            Ok(_) => {
                info!(closed = connections.len(), "Server shut down");
                Ok(())
            }
            Err(_) => {
                warn!(
                    remaining = self.client_count(),
                    timeout_ms = self.inner.config.shutdown_timeout.as_millis() as u64,
                    "Connections still closing at shutdown deadline"
                );
                Err(ProtocolError::Timeout)
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        if let Ok(clients) = self.inner.clients.lock() {
            clients.values().for_each(Connection::close);
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.inner.local_addr)
            .field("clients", &self.client_count())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

impl ServerInner {
    fn lock_clients(&self) -> Result<MutexGuard<'_, HashMap<ConnectionId, Connection>>> {
        self.clients
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_CLIENTS_LOCK.to_string()))
    }

    fn lock_state<'a, T>(&self, slot: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
        slot.lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_SERVER_STATE_LOCK.to_string()))
    }

    /// Register an accepted socket and start its loops, or drop it when full.
    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let mut clients = self.lock_clients()?;
        if clients.len() >= self.config.max_connections {
            global_metrics().connection_rejected();
            warn!(
                %peer,
                limit = self.config.max_connections,
                "Connection limit reached, dropping socket"
            );
            return Err(ProtocolError::ServerFull(self.config.max_connections));
        }

        let id = ConnectionId::new();
        let registry: Weak<ServerInner> = Arc::downgrade(self);
        let setup = ConnectionSetup {
            identity: Some(id),
            role: Origin::Server,
            queue_depth: self.config.max_outbound_queue_depth_per_client,
            retry_transient_reads: false,
            codec: Arc::clone(&self.codec),
            hooks: Arc::clone(&self.hooks),
            dispatcher: Some(Arc::clone(&self.dispatcher)),
            teardown: Some(Box::new(move |info: &ConnectionInfo| {
                if let Some(server) = registry.upgrade() {
                    server.forget(info.id);
                }
            })),
        };
        let (connection, driver) = Connection::new(stream, setup)?;
        clients.insert(id, connection.clone());
        let live = clients.len();
        drop(clients);

        debug!(connection = %id, %peer, live, "Client admitted");
        self.hooks.emit_connected(&connection.info());
        driver.spawn();
        Ok(())
    }

    fn forget(&self, id: ConnectionId) {
        match self.clients.lock() {
            Ok(mut clients) => {
                clients.remove(&id);
            }
            Err(_) => warn!(connection = %id, "{}", constants::ERR_CLIENTS_LOCK),
        }
    }
}

async fn accept_loop(server: Arc<ServerInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = server.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = server.admit(stream, peer) {
                    debug!(%peer, error = %e, "Connection not admitted");
                }
            }
            Err(e) => {
                // per-socket accept failures do not stop the server
                global_metrics().io_error();
                warn!(error = %e, "Accept failed");
            }
        }
    }
    debug!(local_addr = %server.local_addr, "Accept loop stopped");
}
