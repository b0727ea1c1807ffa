use std::{
    collections::HashMap,
    mem,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};

use super::{Client, ClientError};
use crate::protocol::ChangeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    /// Queue full; the event was dropped.
    Dropped,
    /// No live subscription under that id.
    Unknown,
}

/// Delivery queues of the active subscriptions, keyed by subscription id.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    queues: Mutex<HashMap<String, Sender<ChangeEvent>>>,
}

impl SubscriptionRegistry {
    pub fn register(&self, id: &str, capacity: usize) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel::bounded(capacity.max(1));
        self.lock().insert(id.to_string(), tx);
        rx
    }

    /// Enqueues without blocking. Queues whose handle was dropped are pruned.
    pub fn deliver(&self, id: &str, event: ChangeEvent) -> Delivery {
        let mut queues = self.lock();
        let Some(tx) = queues.get(id) else {
            return Delivery::Unknown;
        };

        match tx.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Disconnected(_)) => {
                queues.remove(id);
                Delivery::Unknown
            }
        }
    }

    /// Removes a subscription, ending its event sequence once buffered events are read.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn clear(&self) -> usize {
        let queues = mem::take(&mut *self.lock());
        queues.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Sender<ChangeEvent>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a live change feed.
///
/// Events arrive in server order. When the consumer falls behind by more than the
/// queue capacity, newer events are dropped. The sequence ends after
/// [`unsubscribe`](Subscription::unsubscribe) or [`Client::close`].
#[derive(Debug)]
pub struct Subscription {
    id: String,
    events: Receiver<ChangeEvent>,
    client: Client,
}

impl Subscription {
    pub(crate) fn new(id: String, events: Receiver<ChangeEvent>, client: Client) -> Self {
        Self { id, events, client }
    }

    /// Subscription id, equal to the correlation id of the subscribe request.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Blocks for the next event. `None` once the subscription has ended.
    pub fn recv(&self) -> Option<ChangeEvent> {
        self.events.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChangeEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.events.try_recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChangeEvent> + '_ {
        self.events.iter()
    }

    /// Stops the feed and tells the server, without waiting for an acknowledgment.
    pub fn unsubscribe(&self) -> Result<(), ClientError> {
        self.client.unsubscribe(&self.id)
    }
}

impl<'a> IntoIterator for &'a Subscription {
    type Item = ChangeEvent;
    type IntoIter = channel::Iter<'a, ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::Document;

    fn insert(n: u64) -> ChangeEvent {
        ChangeEvent::Insert {
            new: Document {
                id: n.to_string(),
                collection: "users".to_string(),
                data: json!({ "n": n }),
                created_at: None,
                updated_at: None,
            },
        }
    }

    #[test]
    fn full_queue_drops_newest() {
        let registry = SubscriptionRegistry::default();
        let rx = registry.register("1", 3);

        let outcomes: Vec<_> = (0..5).map(|n| registry.deliver("1", insert(n))).collect();
        assert_eq!(
            outcomes,
            [
                Delivery::Queued,
                Delivery::Queued,
                Delivery::Queued,
                Delivery::Dropped,
                Delivery::Dropped
            ]
        );

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received, vec![insert(0), insert(1), insert(2)]);
    }

    #[test]
    fn unknown_subscription() {
        let registry = SubscriptionRegistry::default();
        assert_eq!(registry.deliver("nope", insert(0)), Delivery::Unknown);
    }

    #[test]
    fn dropped_handle_is_pruned() {
        let registry = SubscriptionRegistry::default();
        drop(registry.register("1", 4));

        assert_eq!(registry.deliver("1", insert(0)), Delivery::Unknown);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn remove_ends_sequence_after_buffered_events() {
        let registry = SubscriptionRegistry::default();
        let rx = registry.register("1", 4);
        registry.deliver("1", insert(7));

        assert!(registry.remove("1"));
        assert!(!registry.remove("1"));
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![insert(7)]);
    }

    #[test]
    fn clear_closes_all_queues() {
        let registry = SubscriptionRegistry::default();
        let a = registry.register("1", 4);
        let b = registry.register("2", 4);

        assert_eq!(registry.clear(), 2);
        assert!(a.recv().is_err());
        assert!(b.recv().is_err());
        assert_eq!(registry.clear(), 0);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let registry = SubscriptionRegistry::default();
        let rx = registry.register("1", 0);

        assert_eq!(registry.deliver("1", insert(0)), Delivery::Queued);
        assert_eq!(rx.try_recv().unwrap(), insert(0));
    }
}
