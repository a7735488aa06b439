//! Core types for the messaging subsystem: identifiers, parties, models,
//! errors, and configuration.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;
pub mod party;

pub use config::{ListingConfig, MessagingConfig, PurgeConfig, RealtimeConfig, StorageConfig};
pub use conversation::{
    Conversation, ConversationStatus, GENERAL_INQUIRY_LABEL, HideSlot, derive_status,
};
pub use errors::{MessagingError, MessagingResult};
pub use ids::{AgencyId, ConversationId, MessageId, PropertyId, ProvisionalId, UserId};
pub use message::{DraftMessage, MAX_BODY_LEN, Message};
pub use party::{PartyRole, PartySide, UnknownParty, Viewer};
