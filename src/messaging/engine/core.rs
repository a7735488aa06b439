//! Messaging engine orchestration.
//!
//! One facade wires the store, the visibility resolver, the read tracker,
//! and the event bus behind the operations the HTTP surface (and any
//! embedder) consumes. Every mutation resolves access first, persists, then
//! broadcasts fire-and-forget; the HTTP response never waits on fan-out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::messaging::access::directory::{AgencyDirectory, PropertyDirectory};
use crate::messaging::access::resolver::{Access, resolve};
use crate::messaging::core::config::MessagingConfig;
use crate::messaging::core::conversation::{Conversation, ConversationStatus, derive_status};
use crate::messaging::core::errors::{MessagingError, MessagingResult};
use crate::messaging::core::ids::{ConversationId, PropertyId, UserId};
use crate::messaging::core::message::{DraftMessage, Message};
use crate::messaging::core::party::{PartyRole, Viewer};
use crate::messaging::read::tracker::ReadTracker;
use crate::messaging::realtime::bus::{EventBus, Subscription};
use crate::messaging::realtime::event::ConversationEvent;
use crate::messaging::session::reconcile::ConversationSession;
use crate::messaging::store::conversation_store::{
    ConversationStore, CreateOutcome, DeleteOutcome, ListQuery, ListScope, NewConversation,
    SqliteConversationStore,
};

/// Backend dependencies for the messaging engine.
pub struct MessagingBackends {
    /// Conversation store implementation.
    pub store: Arc<dyn ConversationStore>,
    /// Agency membership collaborator.
    pub agencies: Arc<dyn AgencyDirectory>,
    /// Property display collaborator.
    pub properties: Arc<dyn PropertyDirectory>,
}

impl MessagingBackends {
    /// Build `SQLite`-backed storage with the given collaborators.
    ///
    /// # Errors
    /// Returns an error if the store cannot be initialized.
    pub async fn sqlite(
        config: &MessagingConfig,
        agencies: Arc<dyn AgencyDirectory>,
        properties: Arc<dyn PropertyDirectory>,
    ) -> MessagingResult<Self> {
        let store = Arc::new(SqliteConversationStore::new(&config.storage).await?);
        Ok(Self {
            store,
            agencies,
            properties,
        })
    }
}

/// Request to open (or find) an inquiry thread.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InquiryRequest {
    /// The client party; ignored for client callers (their own id is used).
    pub client_id: Option<UserId>,
    /// The agent party; ignored for agent callers (their own id is used).
    pub agent_id: Option<UserId>,
    /// The property the inquiry is about, if any.
    pub property_id: Option<PropertyId>,
    /// Optional first message body.
    pub body: Option<String>,
}

/// One row of a viewer's conversation list, ready for display.
#[derive(Clone, Debug, Serialize)]
pub struct InboxEntry {
    /// The conversation row.
    pub conversation: Conversation,
    /// Unread count for the viewer's side.
    pub unread: u64,
    /// Derived status as seen by this viewer.
    pub status: ConversationStatus,
    /// Whether the viewer's side has ever opened the thread UI.
    pub opened: bool,
    /// Unread activity landed after the thread was first opened (drives the
    /// "updated" accent, as opposed to a never-visited thread).
    pub unread_since_open: bool,
    /// Property display label ("General Inquiry" when unresolvable).
    pub property_label: String,
}

/// One page of a viewer's conversation list.
#[derive(Clone, Debug, Serialize)]
pub struct InboxPage {
    /// Rows on this page.
    pub items: Vec<InboxEntry>,
    /// Total rows matching the query.
    pub total: u64,
    /// The 1-based page number served.
    pub page: u32,
    /// The page size served.
    pub page_size: u32,
}

/// Everything a surface needs for one open thread: the row, a seeded
/// reconciliation session, and a scoped room subscription whose drop leaves
/// the room.
pub struct OpenConversation {
    /// The conversation row at open time.
    pub conversation: Conversation,
    /// Reconciliation state seeded with the fetched history.
    pub session: ConversationSession,
    /// Scoped membership in the conversation's event room.
    pub subscription: Subscription,
}

/// Messaging engine facade.
pub struct MessagingEngine {
    config: MessagingConfig,
    store: Arc<dyn ConversationStore>,
    agencies: Arc<dyn AgencyDirectory>,
    properties: Arc<dyn PropertyDirectory>,
    bus: EventBus,
    tracker: ReadTracker,
}

impl MessagingEngine {
    /// Create a new messaging engine.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: MessagingConfig, backends: MessagingBackends) -> MessagingResult<Self> {
        config.validate()?;
        let bus = EventBus::new(&config.realtime);
        let tracker = ReadTracker::new(Arc::clone(&backends.store), bus.clone());

        Ok(Self {
            config,
            store: backends.store,
            agencies: backends.agencies,
            properties: backends.properties,
            bus,
            tracker,
        })
    }

    /// The engine's validated configuration.
    #[must_use]
    pub const fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// The engine's event bus (shared with every subscription it hands out).
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The engine's store handle (shared with background workers).
    #[must_use]
    pub fn store(&self) -> Arc<dyn ConversationStore> {
        Arc::clone(&self.store)
    }

    /// Resolve the viewer's access on a conversation, consulting the agency
    /// directory for admins.
    async fn access_for(
        &self,
        viewer: &Viewer,
        conversation: &Conversation,
        include_archived: bool,
    ) -> MessagingResult<Access> {
        let admin_same_agency = if viewer.role == PartyRole::AgencyAdmin {
            self.agencies
                .same_agency(viewer.user_id, conversation.agent_id)
                .await?
        } else {
            false
        };
        Ok(resolve(
            conversation,
            viewer,
            admin_same_agency,
            include_archived,
        ))
    }

    async fn fetch(&self, id: ConversationId) -> MessagingResult<Conversation> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| MessagingError::conversation_not_found(id))
    }

    /// The list/badge scope of a viewer.
    async fn scope_for(&self, viewer: &Viewer) -> MessagingResult<ListScope> {
        match viewer.role {
            PartyRole::Client => Ok(ListScope::Client(viewer.user_id)),
            PartyRole::Agent => Ok(ListScope::Agent(viewer.user_id)),
            PartyRole::AgencyAdmin => {
                let Some(agency_id) = viewer.agency_id else {
                    return Err(MessagingError::Forbidden(
                        "admin session carries no agency".to_string(),
                    ));
                };
                Ok(ListScope::Agency(self.agencies.agents_of(agency_id).await?))
            }
        }
    }

    /// Create an inquiry thread, or find the existing active one for the
    /// same (client, agent, property) identity.
    ///
    /// Clients inquire for themselves; agent- and admin-initiated threads
    /// name the client explicitly. A supplied body is appended either way.
    ///
    /// # Errors
    /// `NotFound` when a required party reference is missing; validation and
    /// storage errors propagate.
    pub async fn create_conversation(
        &self,
        viewer: Viewer,
        request: InquiryRequest,
    ) -> MessagingResult<CreateOutcome> {
        let (client_id, agent_id) = match viewer.role {
            PartyRole::Client => (viewer.user_id, request.agent_id),
            PartyRole::Agent => {
                let client_id = request.client_id.ok_or_else(|| {
                    MessagingError::NotFound("client reference".to_string())
                })?;
                (client_id, Some(viewer.user_id))
            }
            PartyRole::AgencyAdmin => {
                let client_id = request.client_id.ok_or_else(|| {
                    MessagingError::NotFound("client reference".to_string())
                })?;
                (client_id, request.agent_id)
            }
        };

        let initial_message = match request.body {
            Some(body) => Some(DraftMessage::new(viewer.user_id, viewer.role, body)?),
            None => None,
        };

        let outcome = self
            .store
            .create_conversation(NewConversation {
                client_id,
                agent_id,
                property_id: request.property_id,
                initial_message,
            })
            .await?;

        if outcome.created {
            info!(conversation_id = %outcome.conversation.id, "conversation created");
        }
        if let Some(message) = &outcome.initial_message {
            self.bus.publish(&ConversationEvent::MessageCreated {
                conversation_id: outcome.conversation.id,
                message: message.clone(),
            });
        }

        Ok(outcome)
    }

    /// Fetch a conversation the viewer is allowed to see.
    ///
    /// # Errors
    /// `NotFound` if absent, `Forbidden` if not visible to the viewer.
    pub async fn conversation(
        &self,
        viewer: Viewer,
        id: ConversationId,
    ) -> MessagingResult<Conversation> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, true).await?;
        if !access.is_visible() {
            return Err(MessagingError::Forbidden(
                "conversation is not visible to this viewer".to_string(),
            ));
        }
        Ok(conversation)
    }

    /// All messages of a thread the viewer is allowed to see, in order.
    ///
    /// # Errors
    /// `NotFound` if absent, `Forbidden` if not visible to the viewer.
    pub async fn messages(
        &self,
        viewer: Viewer,
        id: ConversationId,
    ) -> MessagingResult<Vec<Message>> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, true).await?;
        if !access.is_visible() {
            return Err(MessagingError::Forbidden(
                "conversation is not visible to this viewer".to_string(),
            ));
        }
        self.store.messages(id).await
    }

    /// Append a message to a thread.
    ///
    /// # Errors
    /// `NotFound` if the thread is absent; `Forbidden` for non-parties,
    /// reassigned-away agents, and threads the sender has hidden.
    pub async fn send_message(
        &self,
        viewer: Viewer,
        id: ConversationId,
        body: impl Into<String>,
    ) -> MessagingResult<Message> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, false).await?;
        if !access.can_write() {
            return Err(MessagingError::Forbidden(
                "viewer may not post to this conversation".to_string(),
            ));
        }

        let draft = DraftMessage::new(viewer.user_id, viewer.role, body)?;
        let message = self.store.append_message(id, draft).await?;

        self.bus.publish(&ConversationEvent::MessageCreated {
            conversation_id: id,
            message: message.clone(),
        });
        Ok(message)
    }

    /// One page of the viewer's conversation list, annotated for display.
    ///
    /// # Errors
    /// Returns an error if storage or collaborator lookups fail.
    pub async fn list_conversations(
        &self,
        viewer: Viewer,
        mut query: ListQuery,
    ) -> MessagingResult<InboxPage> {
        if query.page_size == 0 {
            query.page_size = self.config.listing.default_page_size;
        }
        query.page_size = query.page_size.min(self.config.listing.max_page_size);

        let scope = self.scope_for(&viewer).await?;
        let page = self.store.list_for(scope, query).await?;

        let mut items = Vec::with_capacity(page.items.len());
        for summary in page.items {
            let property_label = self
                .properties
                .label_for(summary.conversation.property_id)
                .await?;
            let status = derive_status(
                &summary.conversation,
                &viewer,
                summary.unread_from_client,
                summary.agent_has_replied,
            );
            let opened = summary.conversation.opened_by(viewer.side());
            items.push(InboxEntry {
                conversation: summary.conversation,
                unread: summary.unread,
                status,
                opened,
                unread_since_open: opened && summary.unread > 0,
                property_label,
            });
        }

        Ok(InboxPage {
            items,
            total: page.total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    /// Total unread messages across the viewer's threads (navigation badge).
    ///
    /// # Errors
    /// Returns an error if storage or collaborator lookups fail.
    pub async fn unread_total(&self, viewer: Viewer) -> MessagingResult<u64> {
        let scope = self.scope_for(&viewer).await?;
        self.store.unread_total(scope).await
    }

    /// Mark every message from the other side as read.
    ///
    /// # Errors
    /// `Forbidden` when the viewer may not consume the unread signal (a
    /// reassigned-away agent, or a thread hidden from the viewer).
    pub async fn mark_read(&self, viewer: Viewer, id: ConversationId) -> MessagingResult<u64> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, false).await?;
        if !access.can_consume_unread() {
            return Err(MessagingError::Forbidden(
                "viewer may not consume this conversation's unread signal".to_string(),
            ));
        }

        self.tracker
            .mark_read(id, viewer.side(), viewer.user_id)
            .await
    }

    /// Record that the viewer opened the thread UI.
    ///
    /// Opening always triggers a read sweep: the advisory opened flag and
    /// the message-level acks move together under one rule.
    ///
    /// # Errors
    /// Same access requirements as [`MessagingEngine::mark_read`].
    pub async fn mark_opened(&self, viewer: Viewer, id: ConversationId) -> MessagingResult<()> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, false).await?;
        if !access.can_consume_unread() {
            return Err(MessagingError::Forbidden(
                "viewer may not consume this conversation's unread signal".to_string(),
            ));
        }

        self.store.mark_opened(id, viewer.side()).await?;
        self.tracker
            .mark_read(id, viewer.side(), viewer.user_id)
            .await?;
        Ok(())
    }

    /// Archive the thread off the viewer's own list.
    ///
    /// # Errors
    /// `Forbidden` when the thread is not visible to the viewer at all.
    pub async fn archive(
        &self,
        viewer: Viewer,
        id: ConversationId,
    ) -> MessagingResult<Conversation> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, true).await?;
        if !access.can_archive() {
            return Err(MessagingError::Forbidden(
                "conversation is not visible to this viewer".to_string(),
            ));
        }

        let slot = conversation.hide_slot_for(&viewer);
        let updated = self.store.archive_for_party(id, slot).await?;
        self.bus.publish(&ConversationEvent::Archived {
            conversation_id: id,
            side: viewer.side(),
        });
        Ok(updated)
    }

    /// Restore a previously archived thread to the viewer's list.
    ///
    /// # Errors
    /// Same access requirements as [`MessagingEngine::archive`].
    pub async fn restore(
        &self,
        viewer: Viewer,
        id: ConversationId,
    ) -> MessagingResult<Conversation> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, true).await?;
        if !access.can_archive() {
            return Err(MessagingError::Forbidden(
                "conversation is not visible to this viewer".to_string(),
            ));
        }

        let slot = conversation.hide_slot_for(&viewer);
        self.store.restore_for_party(id, slot).await
    }

    /// Delete the thread from the viewer's side; when the other side already
    /// hid it, the thread and its messages are permanently removed.
    ///
    /// # Errors
    /// Same access requirements as [`MessagingEngine::archive`].
    pub async fn delete(
        &self,
        viewer: Viewer,
        id: ConversationId,
    ) -> MessagingResult<DeleteOutcome> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, true).await?;
        if !access.can_archive() {
            return Err(MessagingError::Forbidden(
                "conversation is not visible to this viewer".to_string(),
            ));
        }

        let slot = conversation.hide_slot_for(&viewer);
        let outcome = self.store.delete_for_party(id, slot).await?;
        match &outcome {
            DeleteOutcome::Hidden(_) => {
                self.bus.publish(&ConversationEvent::Archived {
                    conversation_id: id,
                    side: viewer.side(),
                });
            }
            DeleteOutcome::Purged => {
                info!(conversation_id = %id, "conversation purged after dual hide");
                self.bus
                    .publish(&ConversationEvent::Deleted { conversation_id: id });
            }
        }
        Ok(outcome)
    }

    /// Transfer ownership of a thread to another agent of the admin's
    /// agency.
    ///
    /// # Errors
    /// `Forbidden` unless the caller is an admin of both the current and the
    /// new agent's agency; `Conflict` when the agent side hid the thread.
    pub async fn reassign(
        &self,
        viewer: Viewer,
        id: ConversationId,
        new_agent_id: UserId,
    ) -> MessagingResult<Conversation> {
        if viewer.role != PartyRole::AgencyAdmin {
            return Err(MessagingError::Forbidden(
                "only agency admins may reassign".to_string(),
            ));
        }

        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, true).await?;
        if !access.can_write() {
            return Err(MessagingError::Forbidden(
                "admin does not manage this conversation's agency".to_string(),
            ));
        }
        if !self
            .agencies
            .same_agency(viewer.user_id, Some(new_agent_id))
            .await?
        {
            return Err(MessagingError::Forbidden(
                "target agent is not in the admin's agency".to_string(),
            ));
        }

        let updated = self.store.reassign(id, viewer.user_id, new_agent_id).await?;
        debug!(conversation_id = %id, new_agent = %new_agent_id, "conversation reassigned");
        self.bus
            .publish(&ConversationEvent::Reassigned { conversation_id: id });
        Ok(updated)
    }

    /// Join a conversation's event room.
    ///
    /// Joining grants nothing beyond transport: visibility was checked here,
    /// and every mutation re-checks independently.
    ///
    /// # Errors
    /// `NotFound` if absent, `Forbidden` if not visible to the viewer.
    pub async fn join_events(
        &self,
        viewer: Viewer,
        id: ConversationId,
    ) -> MessagingResult<Subscription> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, true).await?;
        if !access.is_visible() {
            return Err(MessagingError::Forbidden(
                "conversation is not visible to this viewer".to_string(),
            ));
        }
        Ok(self.bus.join(id))
    }

    /// Open a thread: fetch it, seed a reconciliation session with its
    /// history, and join its event room in one step.
    ///
    /// # Errors
    /// `NotFound` if absent, `Forbidden` if not visible to the viewer.
    pub async fn open_conversation(
        &self,
        viewer: Viewer,
        id: ConversationId,
    ) -> MessagingResult<OpenConversation> {
        let conversation = self.fetch(id).await?;
        let access = self.access_for(&viewer, &conversation, true).await?;
        if !access.is_visible() {
            return Err(MessagingError::Forbidden(
                "conversation is not visible to this viewer".to_string(),
            ));
        }

        // Join before fetching so nothing lands in the gap; the session
        // dedupes any overlap by server id.
        let subscription = self.bus.join(id);
        let history = self.store.messages(id).await?;
        Ok(OpenConversation {
            conversation,
            session: ConversationSession::new(id, viewer, history),
            subscription,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::messaging::access::directory::{
        InMemoryAgencyDirectory, InMemoryPropertyDirectory,
    };
    use crate::messaging::core::config::StorageConfig;
    use crate::messaging::core::conversation::GENERAL_INQUIRY_LABEL;
    use crate::messaging::core::ids::AgencyId;
    use crate::messaging::realtime::event::ConversationEvent;

    struct Fixture {
        engine: MessagingEngine,
        agencies: Arc<InMemoryAgencyDirectory>,
        properties: Arc<InMemoryPropertyDirectory>,
    }

    async fn fixture() -> Fixture {
        let config = MessagingConfig {
            storage: StorageConfig {
                sqlite_path: PathBuf::from(":memory:"),
            },
            ..MessagingConfig::default()
        };
        let agencies = Arc::new(InMemoryAgencyDirectory::new());
        let properties = Arc::new(InMemoryPropertyDirectory::new());
        let backends = MessagingBackends::sqlite(
            &config,
            Arc::clone(&agencies) as Arc<dyn AgencyDirectory>,
            Arc::clone(&properties) as Arc<dyn PropertyDirectory>,
        )
        .await
        .unwrap();
        Fixture {
            engine: MessagingEngine::new(config, backends).unwrap(),
            agencies,
            properties,
        }
    }

    #[tokio::test]
    async fn test_reassignment_scenario_end_to_end() {
        let fixture = fixture().await;
        let engine = &fixture.engine;

        let agency = AgencyId::new();
        let client = Viewer::client(UserId::new());
        let first_agent = UserId::new();
        let second_agent = UserId::new();
        let admin = UserId::new();
        fixture.agencies.register(first_agent, agency);
        fixture.agencies.register(second_agent, agency);
        fixture.agencies.register(admin, agency);

        let property = PropertyId::new();
        let outcome = engine
            .create_conversation(
                client,
                InquiryRequest {
                    agent_id: Some(first_agent),
                    property_id: Some(property),
                    body: Some("is the flat still available?".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();
        let id = outcome.conversation.id;
        assert_eq!(outcome.conversation.agent_id, Some(first_agent));
        assert!(!outcome.conversation.hidden_from_client);
        assert!(!outcome.conversation.hidden_from_agent);

        // Agent replies; each side's unread reflects the other's traffic.
        let first_agent_view = Viewer::agent(first_agent, agency);
        engine
            .mark_read(first_agent_view, id)
            .await
            .unwrap();
        engine
            .send_message(first_agent_view, id, "it is, when would you visit?")
            .await
            .unwrap();
        assert_eq!(engine.unread_total(client).await.unwrap(), 1);
        assert_eq!(engine.unread_total(first_agent_view).await.unwrap(), 0);

        // Admin transfers ownership.
        let admin_view = Viewer::agency_admin(admin, agency);
        let updated = engine.reassign(admin_view, id, second_agent).await.unwrap();
        assert_eq!(updated.original_agent_id, Some(first_agent));
        assert_eq!(updated.agent_id, Some(second_agent));

        // The reassigned-from agent can no longer post nor consume unread.
        let rejected = engine
            .send_message(first_agent_view, id, "wait, that was mine")
            .await;
        assert!(matches!(rejected, Err(MessagingError::Forbidden(_))));
        let rejected = engine.mark_read(first_agent_view, id).await;
        assert!(matches!(rejected, Err(MessagingError::Forbidden(_))));

        // The new owner has full access.
        let second_agent_view = Viewer::agent(second_agent, agency);
        engine
            .send_message(second_agent_view, id, "picking this up")
            .await
            .unwrap();

        // The former owner may still archive their own list entry, without
        // touching the new owner's or the client's view.
        let archived = engine.archive(first_agent_view, id).await.unwrap();
        assert!(archived.hidden_from_original_agent);
        assert!(!archived.hidden_from_agent);
        assert!(!archived.hidden_from_client);
        assert!(engine.conversation(second_agent_view, id).await.is_ok());
        assert!(engine.conversation(client, id).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_is_idempotent_through_engine() {
        let fixture = fixture().await;
        let client = Viewer::client(UserId::new());
        let agent = UserId::new();
        let property = PropertyId::new();

        let request = InquiryRequest {
            agent_id: Some(agent),
            property_id: Some(property),
            ..InquiryRequest::default()
        };
        let first = fixture
            .engine
            .create_conversation(client, request.clone())
            .await
            .unwrap();
        let second = fixture
            .engine
            .create_conversation(client, request)
            .await
            .unwrap();
        assert_eq!(first.conversation.id, second.conversation.id);
    }

    #[tokio::test]
    async fn test_agent_initiated_inquiry_requires_client() {
        let fixture = fixture().await;
        let agent = Viewer::agent(UserId::new(), AgencyId::new());

        let missing = fixture
            .engine
            .create_conversation(agent, InquiryRequest::default())
            .await;
        assert!(matches!(missing, Err(MessagingError::NotFound(_))));

        let outcome = fixture
            .engine
            .create_conversation(
                agent,
                InquiryRequest {
                    client_id: Some(UserId::new()),
                    body: Some("following up on your visit".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.conversation.agent_id, Some(agent.user_id));
        assert_eq!(outcome.conversation.property_id, None);
    }

    #[tokio::test]
    async fn test_mark_opened_consumes_unread() {
        let fixture = fixture().await;
        let client = Viewer::client(UserId::new());
        let agency = AgencyId::new();
        let agent = UserId::new();
        fixture.agencies.register(agent, agency);

        let outcome = fixture
            .engine
            .create_conversation(
                client,
                InquiryRequest {
                    agent_id: Some(agent),
                    body: Some("hello there".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();
        let id = outcome.conversation.id;

        let agent_view = Viewer::agent(agent, agency);
        fixture.engine.mark_opened(agent_view, id).await.unwrap();

        let row = fixture.engine.conversation(agent_view, id).await.unwrap();
        assert!(row.opened_by_agent);
        assert_eq!(fixture.engine.unread_total(agent_view).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_admin_reply_lands_on_agent_side() {
        let fixture = fixture().await;
        let agency = AgencyId::new();
        let agent = UserId::new();
        let admin = UserId::new();
        fixture.agencies.register(agent, agency);
        fixture.agencies.register(admin, agency);

        let client = Viewer::client(UserId::new());
        let outcome = fixture
            .engine
            .create_conversation(
                client,
                InquiryRequest {
                    agent_id: Some(agent),
                    body: Some("any parking?".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();
        let id = outcome.conversation.id;

        let admin_view = Viewer::agency_admin(admin, agency);
        let message = fixture
            .engine
            .send_message(admin_view, id, "yes, one spot included")
            .await
            .unwrap();
        assert_eq!(message.sender_role, PartyRole::AgencyAdmin);
        assert_eq!(message.side(), crate::messaging::core::party::PartySide::Agent);

        // The client sees one unread from the agent side.
        assert_eq!(fixture.engine.unread_total(client).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_foreign_admin_is_rejected() {
        let fixture = fixture().await;
        let agency = AgencyId::new();
        let other_agency = AgencyId::new();
        let agent = UserId::new();
        let foreign_admin = UserId::new();
        fixture.agencies.register(agent, agency);
        fixture.agencies.register(foreign_admin, other_agency);

        let client = Viewer::client(UserId::new());
        let outcome = fixture
            .engine
            .create_conversation(
                client,
                InquiryRequest {
                    agent_id: Some(agent),
                    body: Some("hi".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();

        let admin_view = Viewer::agency_admin(foreign_admin, other_agency);
        let rejected = fixture
            .engine
            .reassign(admin_view, outcome.conversation.id, agent)
            .await;
        assert!(matches!(rejected, Err(MessagingError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_list_annotates_status_and_property_label() {
        let fixture = fixture().await;
        let agency = AgencyId::new();
        let agent = UserId::new();
        fixture.agencies.register(agent, agency);
        let property = PropertyId::new();
        fixture.properties.register(property, "Loft on 5th");

        let client = Viewer::client(UserId::new());
        let outcome = fixture
            .engine
            .create_conversation(
                client,
                InquiryRequest {
                    agent_id: Some(agent),
                    property_id: Some(property),
                    body: Some("is the loft pet friendly?".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();
        let id = outcome.conversation.id;

        let agent_view = Viewer::agent(agent, agency);
        let inbox = fixture
            .engine
            .list_conversations(agent_view, ListQuery::default())
            .await
            .unwrap();
        assert_eq!(inbox.items.len(), 1);
        assert_eq!(inbox.items[0].property_label, "Loft on 5th");
        assert_eq!(inbox.items[0].status, ConversationStatus::New);
        assert_eq!(inbox.items[0].unread, 1);

        fixture.engine.mark_read(agent_view, id).await.unwrap();
        fixture
            .engine
            .send_message(agent_view, id, "it is!")
            .await
            .unwrap();

        let inbox = fixture
            .engine
            .list_conversations(agent_view, ListQuery::default())
            .await
            .unwrap();
        assert_eq!(inbox.items[0].status, ConversationStatus::Responded);
        assert_eq!(inbox.items[0].unread, 0);

        // A general inquiry degrades to the fallback label.
        let general = fixture
            .engine
            .create_conversation(
                client,
                InquiryRequest {
                    agent_id: Some(agent),
                    body: Some("something else entirely".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(general.conversation.property_id, None);
        let inbox = fixture
            .engine
            .list_conversations(agent_view, ListQuery::default())
            .await
            .unwrap();
        assert!(inbox
            .items
            .iter()
            .any(|entry| entry.property_label == GENERAL_INQUIRY_LABEL));
    }

    #[tokio::test]
    async fn test_open_conversation_wires_session_and_room() {
        let fixture = fixture().await;
        let agency = AgencyId::new();
        let agent = UserId::new();
        fixture.agencies.register(agent, agency);

        let client = Viewer::client(UserId::new());
        let outcome = fixture
            .engine
            .create_conversation(
                client,
                InquiryRequest {
                    agent_id: Some(agent),
                    body: Some("first".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();
        let id = outcome.conversation.id;

        let mut open = fixture.engine.open_conversation(client, id).await.unwrap();
        assert_eq!(open.session.messages().len(), 1);

        // A message sent through the engine reaches the open session's room.
        let agent_view = Viewer::agent(agent, agency);
        fixture
            .engine
            .send_message(agent_view, id, "second")
            .await
            .unwrap();
        let event = open.subscription.try_recv().unwrap().unwrap();
        assert!(matches!(event, ConversationEvent::MessageCreated { .. }));
        open.session.apply_event(&event);
        assert_eq!(open.session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_stranger_cannot_open_or_join() {
        let fixture = fixture().await;
        let client = Viewer::client(UserId::new());
        let outcome = fixture
            .engine
            .create_conversation(
                client,
                InquiryRequest {
                    body: Some("unassigned inquiry".to_string()),
                    ..InquiryRequest::default()
                },
            )
            .await
            .unwrap();
        let id = outcome.conversation.id;

        let stranger = Viewer::client(UserId::new());
        assert!(fixture.engine.open_conversation(stranger, id).await.is_err());
        assert!(fixture.engine.join_events(stranger, id).await.is_err());
    }
}
