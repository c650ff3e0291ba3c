//! # Connection Engine
//!
//! One [`Connection`] per TCP socket, shared by the client and server roles.
//!
//! ## Tasks
//! Once open, a connection runs exactly two tokio tasks:
//! - **Receive loop**: reads into a `max_frame_size` buffer, feeds the
//!   [`StreamFramer`], decodes every complete frame, completes the matching pending
//!   request (if any), then raises the event to hooks and per-type handlers.
//! - **Send loop**: drains the bounded outbound queue in FIFO order and writes each
//!   frame. Frames whose event was cancelled after enqueue are skipped, never written.
//!
//! ## States
//! ```text
//! Connecting -> Open -> Closing -> Closed
//! ```
//! Transitions only move forward. Whichever loop exits first moves the connection to
//! `Closing`, which stops the other loop and abandons every pending request; the last
//! loop to exit moves it to `Closed` and fires the disconnected hooks, exactly once.
//!
//! ## Close triggers
//! - zero-byte read (orderly peer shutdown)
//! - read error (client retries `Interrupted`, `WouldBlock`, `TimedOut`)
//! - write error
//! - a frame that fails to decode
//! - a length prefix the framer can never accept (stream desynchronized)
//! - [`Connection::close`]
//!
//! Closing discards frames still waiting in the outbound queue. A loop that unwinds
//! still counts as exited, so a panic cannot leave the connection `Open`.

use crate::core::envelope::EnvelopeCodec;
use crate::core::framer::{StreamFramer, LENGTH_PREFIX_SIZE};
use crate::core::ids::{ConnectionId, CorrelationId, PacketId};
use crate::core::registry::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, RequestContext};
use crate::protocol::event::{CancelFlag, ConnectionInfo, Origin, PacketEvent};
use crate::transport::hooks::Hooks;
use crate::transport::pending::PendingTable;
use crate::transport::queue::{self, Outbound, OutboundQueue, OutboundReceiver};
use crate::utils::metrics::global_metrics;
use once_cell::sync::OnceCell;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a connection. `Closed` is terminal; there is no reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Local,
    PeerClosed,
    ReadError,
    WriteError,
    UndecodableFrame,
    Desynchronized,
    /// The loop unwound before choosing a reason.
    Aborted,
}

/// Reports a loop's exit even when the task unwinds, so the connection still
/// reaches `Closed` and its teardown runs.
struct LoopExit {
    connection: Connection,
    reason: CloseReason,
}

impl LoopExit {
    fn new(connection: &Connection) -> Self {
        Self {
            connection: connection.clone(),
            reason: CloseReason::Aborted,
        }
    }
}

impl Drop for LoopExit {
    fn drop(&mut self) {
        self.connection.loop_exited(self.reason);
    }
}

/// Runs once when the connection reaches `Closed`, before the disconnected hooks.
pub(crate) type Teardown = Box<dyn FnOnce(&ConnectionInfo) + Send + 'static>;

/// Everything a connection needs besides its socket.
pub(crate) struct ConnectionSetup {
    /// Known up front on the server; assigned later by identity sync on the client.
    pub identity: Option<ConnectionId>,
    /// Which side of the connection this process is.
    pub role: Origin,
    pub queue_depth: usize,
    pub retry_transient_reads: bool,
    pub codec: Arc<EnvelopeCodec>,
    pub hooks: Arc<Hooks>,
    pub dispatcher: Option<Arc<Dispatcher>>,
    pub teardown: Option<Teardown>,
}

/// Handle to a queued packet.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    packet_id: PacketId,
    correlation_id: CorrelationId,
    cancelled: CancelFlag,
}

impl SendReceipt {
    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Id a reply will carry.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Keep the packet off the wire if the send loop has not reached it yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct Inner {
    identity: OnceCell<ConnectionId>,
    peer_addr: SocketAddr,
    role: Origin,
    state: AtomicU8,
    codec: Arc<EnvelopeCodec>,
    outbound: OutboundQueue,
    pending: PendingTable,
    hooks: Arc<Hooks>,
    dispatcher: Option<Arc<Dispatcher>>,
    retry_transient_reads: bool,
    /// Fired when closing starts; stops both loops and every waiter.
    shutdown: CancellationToken,
    /// Fired once the connection is `Closed`.
    closed: CancellationToken,
    live_loops: AtomicUsize,
    teardown: Mutex<Option<Teardown>>,
}

/// Cheap, cloneable handle to one live connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// The socket halves and queue consumer, waiting to be turned into tasks.
pub(crate) struct Driver {
    connection: Connection,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    outbound: OutboundReceiver,
}

impl Connection {
    /// Wrap `stream` in the `Connecting` state. Nothing is read or written until
    /// the returned [`Driver`] is spawned.
    pub(crate) fn new(stream: TcpStream, setup: ConnectionSetup) -> Result<(Self, Driver)> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (outbound, receiver) = queue::bounded(setup.queue_depth);

        let identity = OnceCell::new();
        if let Some(id) = setup.identity {
            let _ = identity.set(id);
        }

        let connection = Connection {
            inner: Arc::new(Inner {
                identity,
                peer_addr,
                role: setup.role,
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                codec: setup.codec,
                outbound,
                pending: PendingTable::new(),
                hooks: setup.hooks,
                dispatcher: setup.dispatcher,
                retry_transient_reads: setup.retry_transient_reads,
                shutdown: CancellationToken::new(),
                closed: CancellationToken::new(),
                live_loops: AtomicUsize::new(2),
                teardown: Mutex::new(setup.teardown),
            }),
        };

        let driver = Driver {
            connection: connection.clone(),
            reader,
            writer,
            outbound: receiver,
        };
        Ok((connection, driver))
    }

    /// Identity of this connection; nil on a client that has not synced.
    pub fn id(&self) -> ConnectionId {
        self.inner.identity.get().copied().unwrap_or_default()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id(),
            peer_addr: self.inner.peer_addr,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Which side of the connection this process is.
    pub fn role(&self) -> Origin {
        self.inner.role
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.inner.hooks
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Requests currently awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Frames waiting for the send loop.
    pub fn queued(&self) -> usize {
        self.inner.outbound.len()
    }

    pub(crate) fn assign_identity(&self, id: ConnectionId) -> Result<()> {
        self.inner
            .identity
            .set(id)
            .map_err(|_| ProtocolError::HandshakeError("identity already assigned".into()))
    }

    /// Queue `packet` under a fresh correlation id.
    ///
    /// Fails with [`ProtocolError::QueueFull`] when the outbound queue is at capacity;
    /// nothing is dropped silently. If an `on_sending` hook cancels the packet it is
    /// not queued and the receipt reports it cancelled.
    pub fn send<T: Packet>(&self, packet: T) -> Result<SendReceipt> {
        self.enqueue(packet, None, CancelFlag::default())
    }

    /// Answer `request` with `packet`, correlated to it.
    ///
    /// The reply shares the request's cancellation flag: returns `Ok(None)` without
    /// sending if the request was already cancelled, and a later cancel keeps the
    /// reply off the wire if it is still queued.
    pub fn reply<T: Packet>(
        &self,
        request: &PacketEvent,
        packet: T,
    ) -> Result<Option<SendReceipt>> {
        if request.is_cancelled() {
            trace!(correlation_id = %request.correlation_id(), "Reply suppressed, request cancelled");
            return Ok(None);
        }
        self.enqueue(packet, Some(request.correlation_id()), request.cancel_flag())
            .map(Some)
    }

    /// Send `packet` and wait for the reply carrying its correlation id.
    ///
    /// Returns `Ok(None)` when `timeout` elapses, the connection closes, or an
    /// `on_sending` hook cancels the request. `timeout: None` waits until a reply or
    /// disconnect. The pending entry is gone when this returns, whatever the outcome,
    /// and also if the returned future is dropped early.
    pub async fn send_and_await<T: Packet>(
        &self,
        packet: T,
        timeout: Option<Duration>,
    ) -> Result<Option<PacketEvent>> {
        let correlation_id = CorrelationId::new();
        // registered before the packet is queued so a fast reply cannot slip past
        let (_guard, reply) = self.inner.pending.register(correlation_id)?;
        let receipt = self.enqueue(packet, Some(correlation_id), CancelFlag::default())?;
        if receipt.is_cancelled() {
            return Ok(None);
        }
        global_metrics().request_started();

        let wait = async {
            tokio::select! {
                reply = reply => reply.ok(),
                _ = self.inner.shutdown.cancelled() => None,
            }
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    global_metrics().request_timeout();
                    debug!(
                        connection = %self.id(),
                        %correlation_id,
                        timeout_ms = limit.as_millis() as u64,
                        "Request timed out"
                    );
                    None
                }
            },
            None => wait.await,
        };
        Ok(outcome)
    }

    /// Typed [`send_and_await`](Self::send_and_await). A reply of any type other
    /// than `Resp` is [`ProtocolError::UnexpectedMessage`].
    pub async fn request<Req: Packet, Resp: Packet>(
        &self,
        request: Req,
        timeout: Option<Duration>,
    ) -> Result<Option<Arc<Resp>>> {
        match self.send_and_await(request, timeout).await? {
            Some(reply) => reply
                .downcast::<Resp>()
                .map(Some)
                .ok_or(ProtocolError::UnexpectedMessage),
            None => Ok(None),
        }
    }

    /// Start closing. Idempotent.
    pub fn close(&self) {
        self.begin_close(CloseReason::Local);
    }

    /// Wait until both loops have exited and the connection is `Closed`.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Open => Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => {
                debug!(connection = %self.id(), "{}", constants::ERR_NOT_CONNECTED);
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    fn enqueue<T: Packet>(
        &self,
        packet: T,
        correlation_id: Option<CorrelationId>,
        cancelled: CancelFlag,
    ) -> Result<SendReceipt> {
        self.ensure_open()?;
        let encoded = self.inner.codec.encode(&packet, correlation_id)?;
        let name = self
            .inner
            .codec
            .registry()
            .descriptor(&encoded.packet_id)?
            .shared_name();

        let event = PacketEvent::new(
            encoded.packet_id,
            name,
            encoded.correlation_id,
            self.info(),
            self.inner.role,
            Arc::new(packet),
            cancelled,
        );
        let receipt = SendReceipt {
            packet_id: encoded.packet_id,
            correlation_id: encoded.correlation_id,
            cancelled: event.cancel_flag(),
        };

        self.inner.hooks.emit_sending(&event);
        if event.is_cancelled() {
            trace!(correlation_id = %receipt.correlation_id, "Send cancelled before enqueue");
            return Ok(receipt);
        }

        self.inner.outbound.push(Outbound {
            event,
            frame: encoded.frame,
        })?;
        Ok(receipt)
    }

    fn handle_frame(&self, frame: &[u8]) -> Result<()> {
        let decoded = self.inner.codec.decode(frame)?;
        global_metrics().frame_read((frame.len() + LENGTH_PREFIX_SIZE) as u64);

        let event = PacketEvent::inbound(decoded, self.info(), self.inner.role.peer());
        let answered = self.inner.pending.complete(&event);
        trace!(
            connection = %event.connection().id,
            packet = event.name(),
            correlation_id = %event.correlation_id(),
            answered,
            "Packet received"
        );

        self.inner.hooks.emit_received(&event);
        if let Some(dispatcher) = &self.inner.dispatcher {
            dispatcher.dispatch(&RequestContext::new(event, self.clone()));
        }
        Ok(())
    }

    fn begin_close(&self, reason: CloseReason) {
        let previous = self
            .inner
            .state
            .fetch_max(ConnectionState::Closing as u8, Ordering::SeqCst);
        if previous >= ConnectionState::Closing as u8 {
            return;
        }

        self.inner.shutdown.cancel();
        let abandoned = self.inner.pending.abandon_all();
        debug!(connection = %self.id(), ?reason, abandoned, "Connection closing");
    }

    fn loop_exited(&self, reason: CloseReason) {
        self.begin_close(reason);
        if self.inner.live_loops.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }

    fn finish(&self) {
        self.inner
            .state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
        global_metrics().connection_closed();

        let info = self.info();
        let teardown = self.inner.teardown.lock().ok().and_then(|mut slot| slot.take());
        if let Some(teardown) = teardown {
            teardown(&info);
        }
        self.inner.hooks.emit_disconnected(&info);
        info!(connection = %info.id, peer = %info.peer_addr, "Connection closed");
        self.inner.closed.cancel();
    }
}

impl Driver {
    /// Move to `Open` and start the receive and send loops.
    pub(crate) fn spawn(self) {
        let Driver {
            connection,
            reader,
            writer,
            outbound,
        } = self;

        let _ = connection.inner.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        global_metrics().connection_established();
        info!(
            connection = %connection.id(),
            peer = %connection.peer_addr(),
            role = %connection.role(),
            "Connection open"
        );

        tokio::spawn(receive_loop(connection.clone(), reader));
        tokio::spawn(send_loop(connection, writer, outbound));
    }
}

async fn receive_loop(connection: Connection, mut reader: OwnedReadHalf) {
    let mut exit = LoopExit::new(&connection);
    let inner = &connection.inner;
    let mut framer = StreamFramer::with_max_frame_size(inner.codec.max_frame_size());
    let mut buf = vec![0u8; inner.codec.max_frame_size()];

    let reason = 'read: loop {
        let read = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => None,
            read = reader.read(&mut buf) => Some(read),
        };
        let Some(read) = read else {
            break CloseReason::Local;
        };

        match read {
            Ok(0) => break CloseReason::PeerClosed,
            Ok(n) => {
                for frame in framer.resolve(&buf[..n]) {
                    if let Err(e) = connection.handle_frame(&frame) {
                        global_metrics().protocol_error();
                        warn!(connection = %connection.id(), error = %e, "Undecodable frame");
                        break 'read CloseReason::UndecodableFrame;
                    }
                }
                if framer.is_desynchronized() {
                    global_metrics().protocol_error();
                    warn!(
                        connection = %connection.id(),
                        carry_over = framer.carry_over(),
                        "Frame length out of bounds, stream desynchronized"
                    );
                    break CloseReason::Desynchronized;
                }
            }
            Err(e) if inner.retry_transient_reads && ProtocolError::is_transient_io(&e) => {
                debug!(connection = %connection.id(), error = %e, "Retrying read");
            }
            Err(e) => {
                global_metrics().io_error();
                debug!(connection = %connection.id(), error = %e, "Read failed");
                break CloseReason::ReadError;
            }
        }
    };

    exit.reason = reason;
}

enum Wake {
    Shutdown,
    Item(Option<Outbound>),
}

async fn send_loop(
    connection: Connection,
    mut writer: OwnedWriteHalf,
    mut outbound: OutboundReceiver,
) {
    let mut exit = LoopExit::new(&connection);
    let inner = &connection.inner;

    let reason = loop {
        let wake = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => Wake::Shutdown,
            item = outbound.recv() => Wake::Item(item),
        };

        let item = match wake {
            Wake::Shutdown | Wake::Item(None) => break CloseReason::Local,
            Wake::Item(Some(item)) => item,
        };

        if item.event.is_cancelled() {
            debug!(
                connection = %connection.id(),
                correlation_id = %item.event.correlation_id(),
                "Skipping cancelled packet"
            );
            continue;
        }

        let written = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => None,
            written = writer.write_all(&item.frame) => Some(written),
        };
        match written {
            None => break CloseReason::Local,
            Some(Err(e)) => {
                global_metrics().io_error();
                debug!(connection = %connection.id(), error = %e, "Write failed");
                break CloseReason::WriteError;
            }
            Some(Ok(())) => {
                global_metrics().frame_written(item.frame.len() as u64);
                inner.hooks.emit_sent(&item.event);
            }
        }
    };

    outbound.close();
    let _ = writer.shutdown().await;
    exit.reason = reason;
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer_addr", &self.inner.peer_addr)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .field("queued", &self.queued())
            .finish()
    }
}
