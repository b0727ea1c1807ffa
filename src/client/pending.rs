use std::{
    collections::HashMap,
    mem,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crossbeam::channel::{self, Receiver, Sender};

use crate::protocol::ServerMessage;

/// In-flight requests keyed by correlation id.
///
/// Removing an entry is the only way to obtain its reply slot, so a reply and a
/// disconnect sweep can never both deliver to the same caller.
#[derive(Default)]
pub(crate) struct PendingRequests {
    slots: Mutex<HashMap<String, Sender<ServerMessage>>>,
}

impl PendingRequests {
    pub fn register(&self, id: &str) -> Receiver<ServerMessage> {
        let (tx, rx) = channel::bounded(1);
        self.lock().insert(id.to_string(), tx);
        rx
    }

    /// Hands a reply to its waiter. Returns `false` when nobody is waiting for it.
    pub fn resolve(&self, reply: ServerMessage) -> bool {
        let slot = self.lock().remove(&reply.id);
        match slot {
            // The waiter may have timed out already; the reply is dropped with the slot.
            Some(tx) => {
                let _ = tx.try_send(reply);
                true
            }
            None => false,
        }
    }

    pub fn cancel(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Releases every waiter. Their receivers observe a disconnected channel.
    pub fn sweep(&self) -> usize {
        let slots = mem::take(&mut *self.lock());
        slots.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Sender<ServerMessage>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
