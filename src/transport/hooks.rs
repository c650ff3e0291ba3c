//! Observable connection events.
//!
//! Synchronous callbacks run inline on the task that raised the event, in
//! registration order. They must not block, and must not register further hooks
//! on the same [`Hooks`] from inside a callback. A hook that panics is logged and
//! skipped; the remaining hooks still run.
//!
//! Async consumers use [`Hooks::subscribe`] or [`Hooks::events`] instead, which
//! observe every received packet through a broadcast channel.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::event::{ConnectionInfo, PacketEvent};
use crate::utils::unwind::isolate;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::error;

type ConnectionHook = Box<dyn Fn(&ConnectionInfo) + Send + Sync + 'static>;
type PacketHook = Box<dyn Fn(&PacketEvent) + Send + Sync + 'static>;

/// Buffered received events per broadcast subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct Hooks {
    connected: RwLock<Vec<ConnectionHook>>,
    disconnected: RwLock<Vec<ConnectionHook>>,
    received: RwLock<Vec<PacketHook>>,
    sending: RwLock<Vec<PacketHook>>,
    sent: RwLock<Vec<PacketHook>>,
    events: broadcast::Sender<PacketEvent>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> ProtocolError {
    ProtocolError::Custom(constants::ERR_HOOKS_LOCK.to_string())
}

fn each<H, F: Fn(&H)>(list: &RwLock<Vec<H>>, call: F) {
    let hooks = match list.read() {
        Ok(hooks) => hooks,
        Err(_) => {
            error!("{}", constants::ERR_HOOKS_LOCK);
            return;
        }
    };
    for hook in hooks.iter() {
        if let Err(panic) = isolate(|| call(hook)) {
            error!(panic = %panic, "Event hook panicked");
        }
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::with_event_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Hooks whose broadcast channel buffers `capacity` received events per
    /// subscriber. A subscriber further behind than that lags.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            connected: RwLock::new(Vec::new()),
            disconnected: RwLock::new(Vec::new()),
            received: RwLock::new(Vec::new()),
            sending: RwLock::new(Vec::new()),
            sent: RwLock::new(Vec::new()),
            events,
        }
    }

    /// A connection opened (after identity sync, when enabled).
    pub fn on_connected<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        self.connected.write().map_err(poisoned)?.push(Box::new(hook));
        Ok(())
    }

    /// A connection closed. Fires exactly once per connection.
    pub fn on_disconnected<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        self.disconnected.write().map_err(poisoned)?.push(Box::new(hook));
        Ok(())
    }

    /// A packet was decoded. Runs before any per-type handler.
    pub fn on_received<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&PacketEvent) + Send + Sync + 'static,
    {
        self.received.write().map_err(poisoned)?.push(Box::new(hook));
        Ok(())
    }

    /// A packet is about to be queued. Calling [`PacketEvent::cancel`] keeps it
    /// out of the queue.
    pub fn on_sending<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&PacketEvent) + Send + Sync + 'static,
    {
        self.sending.write().map_err(poisoned)?.push(Box::new(hook));
        Ok(())
    }

    /// A packet was written to the socket.
    pub fn on_sent<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&PacketEvent) + Send + Sync + 'static,
    {
        self.sent.write().map_err(poisoned)?.push(Box::new(hook));
        Ok(())
    }

    /// Receiver for every packet received after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PacketEvent> {
        self.events.subscribe()
    }

    /// [`subscribe`](Self::subscribe) as a `Stream`. Lagging yields an error item.
    pub fn events(&self) -> BroadcastStream<PacketEvent> {
        BroadcastStream::new(self.subscribe())
    }

    pub(crate) fn emit_connected(&self, info: &ConnectionInfo) {
        each(&self.connected, |hook| hook(info));
    }

    pub(crate) fn emit_disconnected(&self, info: &ConnectionInfo) {
        each(&self.disconnected, |hook| hook(info));
    }

    pub(crate) fn emit_received(&self, event: &PacketEvent) {
        each(&self.received, |hook| hook(event));
        // no subscribers is fine
        let _ = self.events.send(event.clone());
    }

    pub(crate) fn emit_sending(&self, event: &PacketEvent) {
        each(&self.sending, |hook| hook(event));
    }

    pub(crate) fn emit_sent(&self, event: &PacketEvent) {
        each(&self.sent, |hook| hook(event));
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}
