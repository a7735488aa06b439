//! Inquiry and conversation messaging core.
//!
//! This module implements the one subsystem of the marketplace with real
//! concurrency and consistency requirements, organized into:
//! - `core`: Identifiers, parties, conversation and message models, errors,
//!   and configuration
//! - `store`: Durable conversation storage (trait + `SQLite` backend)
//! - `access`: Visibility/reassignment resolution and collaborator lookups
//! - `read`: Read-receipt tracking and unread derivation
//! - `realtime`: Per-conversation broadcast rooms and their events
//! - `session`: Client-side reconciliation for open conversations
//! - `maintenance`: Background purge of dual-hidden threads
//! - `engine`: Orchestration of the messaging core

pub mod access;
pub mod core;
pub mod engine;
pub mod maintenance;
pub mod read;
pub mod realtime;
pub mod session;
pub mod store;

// Re-export commonly used types for convenience
pub use access::{
    Access, AgencyDirectory, InMemoryAgencyDirectory, InMemoryPropertyDirectory,
    PropertyDirectory, resolve,
};
pub use core::{
    AgencyId, Conversation, ConversationId, ConversationStatus, DraftMessage,
    GENERAL_INQUIRY_LABEL, HideSlot, ListingConfig, MAX_BODY_LEN, Message, MessageId,
    MessagingConfig, MessagingError, MessagingResult, PartyRole, PartySide, PropertyId,
    ProvisionalId, PurgeConfig, RealtimeConfig, StorageConfig, UserId, Viewer, derive_status,
};
pub use engine::{
    InboxEntry, InboxPage, InquiryRequest, MessagingBackends, MessagingEngine, OpenConversation,
};
pub use maintenance::{PurgeStats, PurgeWorker};
pub use read::ReadTracker;
pub use realtime::{ConversationEvent, EventBus, Subscription, SubscriptionLoss};
pub use session::{ConversationSession, DayGroup, SessionMessage, SessionReaction};
pub use store::{
    ConversationStore, ConversationSummary, CreateOutcome, DeleteOutcome, ListPage, ListQuery,
    ListScope, NewConversation, SortDirection, SortKey, SqliteConversationStore,
};
