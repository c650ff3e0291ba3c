//! Correlation table of requests awaiting a reply.
//!
//! Each entry is a one-shot completion slot keyed by the request's correlation id.
//! The receive loop completes a slot when a frame with a matching id arrives; the
//! waiting side holds a [`PendingGuard`] that removes the entry however the wait
//! ends (reply, timeout, disconnect, or the awaiting future being dropped).

use crate::core::ids::CorrelationId;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::event::PacketEvent;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{error, trace};

type Slots = HashMap<CorrelationId, oneshot::Sender<PacketEvent>>;

#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    slots: Mutex<Slots>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<MutexGuard<'_, Slots>> {
        self.slots
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_PENDING_LOCK.to_string()))
    }

    /// Open a slot for `id`. At most one request per correlation id may be pending.
    pub fn register(
        &self,
        id: CorrelationId,
    ) -> Result<(PendingGuard<'_>, oneshot::Receiver<PacketEvent>)> {
        let mut slots = self.slots()?;
        if slots.contains_key(&id) {
            return Err(ProtocolError::DuplicateCorrelation(id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(id, tx);
        Ok((PendingGuard { table: self, id }, rx))
    }

    /// Deliver `event` to the request it answers. Returns whether one was waiting.
    pub fn complete(&self, event: &PacketEvent) -> bool {
        let slot = match self.slots() {
            Ok(mut slots) => slots.remove(&event.correlation_id()),
            Err(e) => {
                error!(error = %e, "Dropping reply");
                return false;
            }
        };
        match slot {
            // the waiter may have given up between lookup and send
            Some(tx) => tx.send(event.clone()).is_ok(),
            None => false,
        }
    }

    /// Drop every slot; waiters observe no reply.
    pub fn abandon_all(&self) -> usize {
        match self.slots() {
            Ok(mut slots) => {
                let abandoned = slots.len();
                slots.clear();
                abandoned
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots().map(|slots| slots.len()).unwrap_or(0)
    }

    fn remove(&self, id: &CorrelationId) {
        if let Ok(mut slots) = self.slots() {
            if slots.remove(id).is_some() {
                trace!(correlation_id = %id, "Pending request withdrawn");
            }
        }
    }
}

/// Removes its entry from the table on drop.
#[derive(Debug)]
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
