//! Read-receipt tracking.
//!
//! Owns every transition of the per-message `read` flag. Sweeps are
//! serialized per (conversation, side) with keyed async mutexes so a message
//! appended while a sweep is in flight is never retroactively marked read;
//! each successful non-empty sweep broadcasts exactly one read-ack.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::messaging::core::errors::MessagingResult;
use crate::messaging::core::ids::{ConversationId, UserId};
use crate::messaging::core::party::PartySide;
use crate::messaging::realtime::bus::EventBus;
use crate::messaging::realtime::event::ConversationEvent;
use crate::messaging::store::conversation_store::ConversationStore;

/// Read-tracking engine over a conversation store and an event bus.
pub struct ReadTracker {
    store: Arc<dyn ConversationStore>,
    bus: EventBus,
    sweep_locks: DashMap<(ConversationId, PartySide), Arc<Mutex<()>>>,
}

impl ReadTracker {
    /// Create a tracker over the given store and bus.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            sweep_locks: DashMap::new(),
        }
    }

    /// Mark every message from the opposite side as read, on behalf of
    /// `user_id` acting as `side`.
    ///
    /// Returns the number of messages flipped. A zero sweep is a successful
    /// no-op and broadcasts nothing.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist; storage errors
    /// propagate unchanged.
    pub async fn mark_read(
        &self,
        conversation_id: ConversationId,
        side: PartySide,
        user_id: UserId,
    ) -> MessagingResult<u64> {
        let lock = Arc::clone(
            self.sweep_locks
                .entry((conversation_id, side))
                .or_default()
                .value(),
        );
        let _guard = lock.lock().await;

        let swept = self.store.sweep_read(conversation_id, side).await?;
        if swept > 0 {
            let reached = self.bus.publish(&ConversationEvent::ReadAck {
                conversation_id,
                side,
                user_id,
            });
            debug!(%conversation_id, %side, swept, reached, "read sweep acknowledged");
        }

        Ok(swept)
    }

    /// Unread count for one side of one conversation.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    pub async fn unread_count(
        &self,
        conversation_id: ConversationId,
        side: PartySide,
    ) -> MessagingResult<u64> {
        self.store.unread_count(conversation_id, side).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::messaging::core::config::{RealtimeConfig, StorageConfig};
    use crate::messaging::core::ids::PropertyId;
    use crate::messaging::core::message::DraftMessage;
    use crate::messaging::core::party::PartyRole;
    use crate::messaging::store::conversation_store::{NewConversation, SqliteConversationStore};

    async fn fixtures() -> (Arc<SqliteConversationStore>, EventBus, ReadTracker) {
        let config = StorageConfig {
            sqlite_path: PathBuf::from(":memory:"),
        };
        let store = Arc::new(SqliteConversationStore::new(&config).await.unwrap());
        let bus = EventBus::new(&RealtimeConfig::default());
        let tracker = ReadTracker::new(store.clone(), bus.clone());
        (store, bus, tracker)
    }

    #[tokio::test]
    async fn test_mark_read_broadcasts_single_ack() {
        let (store, bus, tracker) = fixtures().await;
        let client = UserId::new();
        let agent = UserId::new();
        let outcome = store
            .create_conversation(NewConversation {
                client_id: client,
                agent_id: Some(agent),
                property_id: Some(PropertyId::new()),
                initial_message: Some(
                    DraftMessage::new(client, PartyRole::Client, "hello").unwrap(),
                ),
            })
            .await
            .unwrap();
        let conversation_id = outcome.conversation.id;

        let mut subscription = bus.join(conversation_id);
        let swept = tracker
            .mark_read(conversation_id, PartySide::Agent, agent)
            .await
            .unwrap();
        assert_eq!(swept, 1);

        let event = subscription.try_recv().unwrap().unwrap();
        assert!(matches!(
            event,
            ConversationEvent::ReadAck {
                side: PartySide::Agent,
                ..
            }
        ));
        // Caught up already: the second sweep is silent.
        let swept = tracker
            .mark_read(conversation_id, PartySide::Agent, agent)
            .await
            .unwrap();
        assert_eq!(swept, 0);
        assert_eq!(subscription.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_mark_read_missing_conversation_is_not_found() {
        let (_store, _bus, tracker) = fixtures().await;
        let result = tracker
            .mark_read(ConversationId::new(), PartySide::Agent, UserId::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_serialize_per_key() {
        let (store, _bus, tracker) = fixtures().await;
        let client = UserId::new();
        let outcome = store
            .create_conversation(NewConversation {
                client_id: client,
                agent_id: Some(UserId::new()),
                property_id: None,
                initial_message: Some(
                    DraftMessage::new(client, PartyRole::Client, "ping").unwrap(),
                ),
            })
            .await
            .unwrap();
        let conversation_id = outcome.conversation.id;
        let tracker = Arc::new(tracker);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = Arc::clone(&tracker);
            let agent = UserId::new();
            handles.push(tokio::spawn(async move {
                tracker
                    .mark_read(conversation_id, PartySide::Agent, agent)
                    .await
                    .unwrap()
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        // Exactly one sweep observed the unread message.
        assert_eq!(total, 1);
    }
}
