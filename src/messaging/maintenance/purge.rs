//! Background purge worker for dual-hidden conversations.
//!
//! A thread both parties have hidden is eligible for permanent deletion; the
//! interactive delete path removes it immediately when the second hide
//! arrives through `delete`, and this worker catches the remainder (threads
//! whose second hide arrived through `archive`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::messaging::core::config::PurgeConfig;
use crate::messaging::core::errors::MessagingResult;
use crate::messaging::realtime::bus::EventBus;
use crate::messaging::realtime::event::ConversationEvent;
use crate::messaging::store::conversation_store::ConversationStore;

/// Statistics from a purge run.
#[derive(Debug, Clone, Default)]
pub struct PurgeStats {
    /// Number of conversations deleted.
    pub purged: usize,
    /// Total run duration in milliseconds.
    pub duration_ms: u64,
}

/// Background purge worker for conversation maintenance.
pub struct PurgeWorker {
    store: Arc<dyn ConversationStore>,
    bus: EventBus,
    config: PurgeConfig,
    shutdown: Arc<Notify>,
}

impl PurgeWorker {
    /// Create a new purge worker.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, bus: EventBus, config: PurgeConfig) -> Self {
        Self {
            store,
            bus,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a shutdown notifier to stop the worker.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the worker as a tokio task.
    ///
    /// Returns a `JoinHandle` that can be used to await completion.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the purge loop until shutdown is signaled.
    async fn run(&self) {
        if !self.config.enabled {
            info!("Background purge is disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_seconds);
        info!(?interval, "Starting background purge worker");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    match self.run_purge().await {
                        Ok(stats) => {
                            if stats.purged > 0 {
                                info!(
                                    purged = stats.purged,
                                    duration_ms = stats.duration_ms,
                                    "Purge completed"
                                );
                            } else {
                                debug!("Purge completed with nothing to remove");
                            }
                        }
                        Err(err) => {
                            warn!(?err, "Purge failed");
                        }
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Background purge worker shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single purge cycle.
    ///
    /// # Errors
    /// Returns an error if store operations fail.
    pub async fn run_purge(&self) -> MessagingResult<PurgeStats> {
        let start = std::time::Instant::now();

        let purged_ids = self.store.purge_dual_hidden().await?;
        for conversation_id in &purged_ids {
            self.bus
                .publish(&ConversationEvent::Deleted {
                    conversation_id: *conversation_id,
                });
        }

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        Ok(PurgeStats {
            purged: purged_ids.len(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::messaging::core::config::{RealtimeConfig, StorageConfig};
    use crate::messaging::core::conversation::HideSlot;
    use crate::messaging::core::ids::{PropertyId, UserId};
    use crate::messaging::store::conversation_store::{
        NewConversation, SqliteConversationStore,
    };

    #[test]
    fn test_config_default() {
        let config = PurgeConfig::default();
        assert_eq!(config.interval_seconds, 3600);
        assert!(config.enabled);
    }

    #[tokio::test]
    async fn test_run_purge_deletes_dual_hidden_and_broadcasts() {
        let store = Arc::new(
            SqliteConversationStore::new(&StorageConfig {
                sqlite_path: PathBuf::from(":memory:"),
            })
            .await
            .unwrap(),
        );
        let bus = EventBus::new(&RealtimeConfig::default());
        let worker = PurgeWorker::new(store.clone(), bus.clone(), PurgeConfig::default());

        let outcome = store
            .create_conversation(NewConversation {
                client_id: UserId::new(),
                agent_id: Some(UserId::new()),
                property_id: Some(PropertyId::new()),
                initial_message: None,
            })
            .await
            .unwrap();
        let id = outcome.conversation.id;
        store.archive_for_party(id, HideSlot::Client).await.unwrap();
        store.archive_for_party(id, HideSlot::Agent).await.unwrap();

        let mut subscription = bus.join(id);
        let stats = worker.run_purge().await.unwrap();
        assert_eq!(stats.purged, 1);
        assert!(store.get(id).await.unwrap().is_none());

        let event = subscription.try_recv().unwrap().unwrap();
        assert!(matches!(event, ConversationEvent::Deleted { .. }));

        // Nothing left: the next run is a no-op.
        let stats = worker.run_purge().await.unwrap();
        assert_eq!(stats.purged, 0);
    }
}
