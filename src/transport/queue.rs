//! Bounded outbound queue.
//!
//! Many producers (application calls, handlers, the handshake) feed one consumer,
//! the connection's send loop. A push never waits: a full queue fails the push
//! with [`ProtocolError::QueueFull`] and the caller decides what to do.

use crate::error::{ProtocolError, Result};
use crate::protocol::event::PacketEvent;
use crate::utils::metrics::global_metrics;
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};

/// One encoded frame waiting for the send loop.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub event: PacketEvent,
    pub frame: Bytes,
}

/// Producer side, cloneable.
#[derive(Debug, Clone)]
pub(crate) struct OutboundQueue {
    tx: mpsc::Sender<Outbound>,
    capacity: usize,
}

/// Consumer side, owned by the send loop.
#[derive(Debug)]
pub(crate) struct OutboundReceiver {
    rx: mpsc::Receiver<Outbound>,
}

/// Queue holding at most `capacity` frames (at least one).
pub(crate) fn bounded(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (OutboundQueue { tx, capacity }, OutboundReceiver { rx })
}

impl OutboundQueue {
    pub fn push(&self, item: Outbound) -> Result<()> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                global_metrics().queue_rejection();
                Err(ProtocolError::QueueFull(self.capacity))
            }
            Err(TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Frames currently waiting.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Stop accepting pushes; frames already queued can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
