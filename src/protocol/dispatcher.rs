use crate::core::ids::{ConnectionId, PacketId};
use crate::core::registry::{Packet, TypeRegistry};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::event::PacketEvent;
use crate::transport::connection::{Connection, SendReceipt};
use crate::utils::metrics::global_metrics;
use crate::utils::unwind::isolate;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, warn};

type HandlerFn = dyn Fn(&RequestContext) -> Result<()> + Send + Sync + 'static;

/// Handle returned by [`Dispatcher::register`], used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Entry {
    id: HandlerId,
    handler: Arc<HandlerFn>,
}

/// What a handler gets besides the typed packet: the inbound event and the
/// connection it arrived on.
pub struct RequestContext {
    event: PacketEvent,
    connection: Connection,
}

impl RequestContext {
    pub(crate) fn new(event: PacketEvent, connection: Connection) -> Self {
        Self { event, connection }
    }

    pub fn event(&self) -> &PacketEvent {
        &self.event
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.event.connection().id
    }

    /// Send `packet` back on the same connection, correlated to this request.
    /// `Ok(None)` means the request was cancelled and nothing was sent.
    pub fn reply<T: Packet>(&self, packet: T) -> Result<Option<SendReceipt>> {
        self.connection.reply(&self.event, packet)
    }

    /// Suppress any reply to this request, including ones already queued.
    pub fn cancel(&self) {
        self.event.cancel();
    }
}

/// Per-type handler table keyed by wire id.
/// Every handler registered for a packet's type runs, in registration order.
pub struct Dispatcher {
    registry: Arc<TypeRegistry>,
    handlers: Arc<RwLock<HashMap<PacketId, Vec<Entry>>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Run `handler` for every inbound `T`. `T` must be registered.
    pub fn register<T, F>(&self, handler: F) -> Result<HandlerId>
    where
        T: Packet,
        F: Fn(&RequestContext, &T) -> Result<()> + Send + Sync + 'static,
    {
        let packet_id = self.registry.id_of::<T>()?;
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let erased = move |ctx: &RequestContext| match ctx.event.downcast_ref::<T>() {
            Some(packet) => handler(ctx, packet),
            None => Err(ProtocolError::UnexpectedMessage),
        };

        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        handlers.entry(packet_id).or_default().push(Entry {
            id,
            handler: Arc::new(erased),
        });
        Ok(id)
    }

    /// Returns whether a handler was removed.
    pub fn remove(&self, id: HandlerId) -> Result<bool> {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        let mut removed = false;
        handlers.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        Ok(removed)
    }

    /// Handlers currently registered for `T`.
    pub fn handler_count<T: Packet>(&self) -> Result<usize> {
        let packet_id = self.registry.id_of::<T>()?;
        let handlers = self.handlers.read().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
        })?;
        Ok(handlers.get(&packet_id).map_or(0, Vec::len))
    }

    /// Run every handler for the event's type. Handler errors and panics are logged
    /// and do not stop later handlers. Returns how many handlers ran.
    pub fn dispatch(&self, ctx: &RequestContext) -> usize {
        // snapshot so handlers may register or remove handlers themselves
        let matching: Vec<Arc<HandlerFn>> = match self.handlers.read() {
            Ok(handlers) => handlers
                .get(&ctx.event.packet_id())
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
                .unwrap_or_default(),
            Err(_) => {
                warn!("{}", constants::ERR_DISPATCHER_READ_LOCK);
                return 0;
            }
        };

        for handler in &matching {
            match isolate(|| handler(ctx)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    global_metrics().handler_failure();
                    warn!(
                        connection = %ctx.connection_id(),
                        packet = ctx.event.name(),
                        error = %e,
                        "Packet handler failed"
                    );
                }
                Err(panic) => {
                    global_metrics().handler_failure();
                    error!(
                        connection = %ctx.connection_id(),
                        packet = ctx.event.name(),
                        panic = %panic,
                        "Packet handler panicked"
                    );
                }
            }
        }
        matching.len()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .handlers
            .read()
            .map(|h| h.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0);
        f.debug_struct("Dispatcher").field("handlers", &count).finish()
    }
}
