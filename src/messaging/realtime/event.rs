//! Events fanned out over per-conversation broadcast rooms.

use serde::{Deserialize, Serialize};

use crate::messaging::core::ids::{ConversationId, UserId};
use crate::messaging::core::message::Message;
use crate::messaging::core::party::PartySide;

/// A state change broadcast to everyone present in a conversation room.
///
/// Delivery is best-effort: the store is the system of record, and any
/// client that misses events reconciles by re-fetching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// A message was persisted.
    MessageCreated {
        /// The owning conversation.
        conversation_id: ConversationId,
        /// The server-confirmed message row.
        message: Message,
    },
    /// A party caught up on the other side's messages.
    ReadAck {
        /// The owning conversation.
        conversation_id: ConversationId,
        /// The side that acknowledged.
        side: PartySide,
        /// The user who acknowledged.
        user_id: UserId,
    },
    /// Ownership was transferred to another agent.
    Reassigned {
        /// The owning conversation.
        conversation_id: ConversationId,
    },
    /// One party archived the thread off their list.
    Archived {
        /// The owning conversation.
        conversation_id: ConversationId,
        /// The side that archived.
        side: PartySide,
    },
    /// The thread was permanently deleted.
    Deleted {
        /// The deleted conversation.
        conversation_id: ConversationId,
    },
}

impl ConversationEvent {
    /// The conversation this event belongs to.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        match self {
            Self::MessageCreated {
                conversation_id, ..
            }
            | Self::ReadAck {
                conversation_id, ..
            }
            | Self::Reassigned { conversation_id }
            | Self::Archived {
                conversation_id, ..
            }
            | Self::Deleted { conversation_id } => *conversation_id,
        }
    }

    /// Stable event-kind tag (for logs and wire framing).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::ReadAck { .. } => "read_ack",
            Self::Reassigned { .. } => "reassigned",
            Self::Archived { .. } => "archived",
            Self::Deleted { .. } => "deleted",
        }
    }
}
