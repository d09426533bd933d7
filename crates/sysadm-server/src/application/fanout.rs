//! EventBus: fans one process-wide event feed out to every live session.
//!
//! # How delivery works (for beginners)
//!
//! Each session gets its own unbounded `mpsc` channel when it is registered.
//! The bus keeps the sending half in a table keyed by [`SessionId`]; the
//! session keeps the receiving half inside its [`Subscription`].
//!
//! [`EventBus::publish`] copies the current senders out of the table, releases
//! the lock, and only then pushes the event into each channel.  Pushing into
//! an unbounded channel never waits, so a session that is slow to read never
//! holds up the publisher, the accept loop, or any other session.
//!
//! # Guarantees
//!
//! - Every event published after `subscribe(id)` and before `unsubscribe(id)`
//!   lands in that session's channel exactly once.
//! - Events from one publisher arrive in the order they were published.
//! - Nothing is promised about ordering *across* sessions.
//!
//! Unsubscribing is explicit and idempotent: the server calls
//! [`EventBus::unsubscribe`] when it deregisters a session, and a second call
//! for the same id does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sysadm_core::{Event, SessionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

type SubscriberTable = HashMap<SessionId, mpsc::UnboundedSender<Event>>;

/// Publish/subscribe fabric shared by the event source and the server.
///
/// Cloning is cheap; every clone refers to the same subscriber table.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<SubscriberTable>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, SubscriberTable> {
        // The table holds only channel senders; a panic elsewhere cannot
        // leave it half-updated, so a poisoned lock is safe to reuse.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes session `id` and returns its event intake.
    ///
    /// If `id` was already subscribed (which the registry rules out), the old
    /// subscription is replaced and its receiver sees the end of its stream.
    pub fn subscribe(&self, id: SessionId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.table().insert(id, tx).is_some() {
            warn!(session_id = %id, "replaced an existing event subscription");
        }
        debug!(session_id = %id, "subscribed to events");
        Subscription { id, rx }
    }

    /// Removes session `id` from the fan-out.
    ///
    /// Returns `true` if a subscription was removed, `false` if there was
    /// none (already unsubscribed, or never subscribed).
    pub fn unsubscribe(&self, id: SessionId) -> bool {
        let removed = self.table().remove(&id).is_some();
        if removed {
            debug!(session_id = %id, "unsubscribed from events");
        }
        removed
    }

    /// Delivers `event` to every current subscriber.
    ///
    /// Returns the number of sessions the event was queued for.  Channels
    /// whose receiver is already gone are pruned from the table.
    pub fn publish(&self, event: Event) -> usize {
        let targets: Vec<(SessionId, mpsc::UnboundedSender<Event>)> = self
            .table()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in targets {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut table = self.table();
            for id in &dead {
                // Only prune if the entry is still the closed one; the id may
                // have been reassigned to a new session meanwhile.
                if table.get(id).is_some_and(mpsc::UnboundedSender::is_closed) {
                    table.remove(id);
                }
            }
        }

        trace!(kind = %event.kind, delivered, "event published");
        delivered
    }

    /// Number of sessions currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.table().len()
    }

    /// Returns `true` if session `id` is subscribed.
    pub fn is_subscribed(&self, id: SessionId) -> bool {
        self.table().contains_key(&id)
    }

    /// Forwards every event from an external source channel onto the bus.
    ///
    /// The returned task ends when the source's sending side is dropped.
    pub fn forward_from(&self, mut source: mpsc::Receiver<Event>) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            while let Some(event) = source.recv().await {
                bus.publish(event);
            }
            debug!("event source closed; forwarder stopped");
        })
    }
}

/// One session's event intake.
#[derive(Debug)]
pub struct Subscription {
    id: SessionId,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// The session this subscription belongs to.
    pub fn session_id(&self) -> SessionId {
        self.id
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the session has been unsubscribed and every event
    /// queued before that has been read.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn event(n: u64) -> Event {
        Event::new("dispatcher", json!({ "seq": n }))
    }

    #[test]
    fn test_publish_reaches_every_subscriber_exactly_once() {
        // Arrange
        let bus = EventBus::new();
        let mut subs: Vec<_> = (0..5).map(|n| bus.subscribe(SessionId::new(n))).collect();

        // Act
        let delivered = bus.publish(event(1));

        // Assert
        assert_eq!(delivered, 5);
        for sub in &mut subs {
            assert_eq!(sub.try_recv(), Some(event(1)));
            assert_eq!(sub.try_recv(), None, "no duplicate delivery");
        }
    }

    #[test]
    fn test_subscriber_sees_nothing_published_before_it_subscribed() {
        let bus = EventBus::new();
        bus.publish(event(1));
        let mut sub = bus.subscribe(SessionId::new(0));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_unsubscribed_session_receives_no_later_events() {
        // Arrange
        let bus = EventBus::new();
        let mut sub = bus.subscribe(SessionId::new(0));
        bus.publish(event(1));

        // Act
        bus.unsubscribe(SessionId::new(0));
        let delivered = bus.publish(event(2));

        // Assert: the queued event survives, the later one never arrives
        assert_eq!(delivered, 0);
        assert_eq!(sub.try_recv(), Some(event(1)));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let _sub = bus.subscribe(SessionId::new(3));
        assert!(bus.unsubscribe(SessionId::new(3)));
        assert!(!bus.unsubscribe(SessionId::new(3)));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(SessionId::new(0));
        for n in 0..100 {
            bus.publish(event(n));
        }
        for n in 0..100 {
            assert_eq!(sub.try_recv(), Some(event(n)));
        }
    }

    #[test]
    fn test_publish_prunes_dropped_receivers() {
        // Arrange
        let bus = EventBus::new();
        let dropped = bus.subscribe(SessionId::new(0));
        let mut kept = bus.subscribe(SessionId::new(1));
        drop(dropped);

        // Act
        let delivered = bus.publish(event(7));

        // Assert
        assert_eq!(delivered, 1);
        assert!(!bus.is_subscribed(SessionId::new(0)));
        assert_eq!(kept.try_recv(), Some(event(7)));
    }

    #[test]
    fn test_recv_wakes_when_event_is_published() {
        // Arrange
        let bus = EventBus::new();
        let mut sub = bus.subscribe(SessionId::new(0));
        let mut recv = task::spawn(sub.recv());
        assert_pending!(recv.poll());

        // Act
        bus.publish(event(9));

        // Assert
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), Some(event(9)));
    }

    #[test]
    fn test_recv_ends_after_unsubscribe() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(SessionId::new(0));
        bus.unsubscribe(SessionId::new(0));
        let mut recv = task::spawn(sub.recv());
        assert_ready_eq!(recv.poll(), None);
    }

    #[tokio::test]
    async fn test_forward_from_relays_source_events_to_subscribers() {
        // Arrange
        let bus = EventBus::new();
        let mut sub = bus.subscribe(SessionId::new(0));
        let (source_tx, source_rx) = mpsc::channel(8);
        let forwarder = bus.forward_from(source_rx);

        // Act
        source_tx.send(event(1)).await.unwrap();
        source_tx.send(event(2)).await.unwrap();
        drop(source_tx);
        forwarder.await.unwrap();

        // Assert
        assert_eq!(sub.recv().await, Some(event(1)));
        assert_eq!(sub.recv().await, Some(event(2)));
    }
}
