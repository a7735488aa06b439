//! Per-conversation broadcast rooms.
//!
//! The bus is a transport, not a security boundary: joining a room grants
//! nothing — the visibility resolver gates all reads and writes
//! independently. Rooms hold no durable state; if a broadcast reaches no one
//! the authoritative store is unaffected.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::messaging::core::config::RealtimeConfig;
use crate::messaging::core::ids::ConversationId;
use crate::messaging::realtime::event::ConversationEvent;

/// Fan-out bus with one broadcast room per conversation.
///
/// Cheap to clone; all clones share the same rooms.
#[derive(Clone, Debug)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    rooms: DashMap<ConversationId, broadcast::Sender<ConversationEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the configured per-room channel capacity.
    #[must_use]
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                rooms: DashMap::new(),
                capacity: config.channel_capacity.max(1),
            }),
        }
    }

    /// Join a conversation's room.
    ///
    /// The returned subscription leaves the room when dropped; the room
    /// itself is reclaimed once its last member leaves.
    #[must_use]
    pub fn join(&self, conversation_id: ConversationId) -> Subscription {
        let receiver = self
            .inner
            .rooms
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();

        Subscription {
            conversation_id,
            receiver,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Broadcast an event to its conversation's room.
    ///
    /// Returns the number of receivers the event was handed to; zero when no
    /// one is present. Never fails the originating operation.
    pub fn publish(&self, event: &ConversationEvent) -> usize {
        let conversation_id = event.conversation_id();
        let Some(sender) = self
            .inner
            .rooms
            .get(&conversation_id)
            .map(|room| room.value().clone())
        else {
            debug!(%conversation_id, kind = event.kind(), "no room, event dropped");
            return 0;
        };

        match sender.send(event.clone()) {
            Ok(reached) => reached,
            Err(_) => {
                debug!(%conversation_id, kind = event.kind(), "room empty, event dropped");
                0
            }
        }
    }

    /// Number of rooms currently held open by at least one member.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }
}

/// What a subscriber observes instead of an event when the stream degrades.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscriptionLoss {
    /// The receiver fell behind and `skipped` events were discarded; the
    /// subscriber must reconcile by re-fetching from the store.
    Lagged(u64),
    /// The room is gone (conversation deleted or bus dropped).
    Closed,
}

/// Scoped membership in one conversation's room.
///
/// Dropping the subscription leaves the room; the lifetime of the
/// subscription is the lifetime of the party's presence.
#[derive(Debug)]
pub struct Subscription {
    conversation_id: ConversationId,
    receiver: broadcast::Receiver<ConversationEvent>,
    inner: Arc<BusInner>,
}

impl Subscription {
    /// The conversation this subscription is joined to.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Wait for the next event.
    ///
    /// # Errors
    /// Returns [`SubscriptionLoss::Lagged`] when events were discarded and
    /// [`SubscriptionLoss::Closed`] when the room is gone.
    pub async fn recv(&mut self) -> Result<ConversationEvent, SubscriptionLoss> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Err(SubscriptionLoss::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => Err(SubscriptionLoss::Closed),
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    ///
    /// Returns `Ok(None)` when no event is pending.
    ///
    /// # Errors
    /// Same loss signals as [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Result<Option<ConversationEvent>, SubscriptionLoss> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Err(SubscriptionLoss::Lagged(skipped))
            }
            Err(broadcast::error::TryRecvError::Closed) => Err(SubscriptionLoss::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Reclaim the room when this is the last member. The count still
        // includes our receiver here, hence <= 1.
        self.inner
            .rooms
            .remove_if(&self.conversation_id, |_, sender| {
                sender.receiver_count() <= 1
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::core::party::PartySide;
    use crate::messaging::core::ids::UserId;

    fn bus() -> EventBus {
        EventBus::new(&RealtimeConfig::default())
    }

    #[tokio::test]
    async fn test_publish_reaches_room_members() {
        let bus = bus();
        let conversation_id = ConversationId::new();
        let mut a = bus.join(conversation_id);
        let mut b = bus.join(conversation_id);

        let event = ConversationEvent::Reassigned { conversation_id };
        assert_eq!(bus.publish(&event), 2);
        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_publish_without_room_is_a_noop() {
        let bus = bus();
        let event = ConversationEvent::Deleted {
            conversation_id: ConversationId::new(),
        };
        assert_eq!(bus.publish(&event), 0);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let bus = bus();
        let here = ConversationId::new();
        let there = ConversationId::new();
        let mut member = bus.join(here);
        let _other = bus.join(there);

        bus.publish(&ConversationEvent::Reassigned {
            conversation_id: there,
        });
        assert_eq!(member.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_room_reclaimed_after_last_leave() {
        let bus = bus();
        let conversation_id = ConversationId::new();
        let first = bus.join(conversation_id);
        let second = bus.join(conversation_id);
        assert_eq!(bus.room_count(), 1);

        drop(first);
        assert_eq!(bus.room_count(), 1);
        drop(second);
        assert_eq!(bus.room_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_observes_loss() {
        let bus = EventBus::new(&RealtimeConfig {
            channel_capacity: 1,
        });
        let conversation_id = ConversationId::new();
        let mut member = bus.join(conversation_id);

        for _ in 0..3 {
            bus.publish(&ConversationEvent::ReadAck {
                conversation_id,
                side: PartySide::Agent,
                user_id: UserId::new(),
            });
        }

        assert!(matches!(
            member.try_recv(),
            Err(SubscriptionLoss::Lagged(_))
        ));
    }
}
