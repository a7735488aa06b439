//! Message model with validation helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messaging::core::errors::{MessagingError, MessagingResult};
use crate::messaging::core::ids::{ConversationId, MessageId, UserId};
use crate::messaging::core::party::{PartyRole, PartySide};

/// Hard ceiling on message body size (64 KiB), matching the platform-wide
/// payload limits.
pub const MAX_BODY_LEN: usize = 65_536;

/// A persisted message within a conversation.
///
/// `read` means "read by the *other* side" and transitions false→true only,
/// driven by explicit read sweeps owned by the read-tracking engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Store-assigned monotonic position within the conversation.
    ///
    /// Zero until the store has persisted the message.
    pub seq: i64,
    /// The sender's user id.
    pub sender_id: UserId,
    /// The sender's role at send time.
    pub sender_role: PartyRole,
    /// Message content.
    pub body: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Whether the other side has read this message.
    pub read: bool,
}

impl Message {
    /// The side of the thread this message was sent from.
    #[must_use]
    pub const fn side(&self) -> PartySide {
        self.sender_role.side()
    }
}

/// A validated, not-yet-persisted message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DraftMessage {
    /// The sender's user id.
    pub sender_id: UserId,
    /// The sender's role.
    pub sender_role: PartyRole,
    /// Trimmed message content.
    pub body: String,
}

impl DraftMessage {
    /// Create a validated draft.
    ///
    /// # Errors
    /// Returns an error if the body is empty after trimming or exceeds
    /// [`MAX_BODY_LEN`].
    pub fn new(
        sender_id: UserId,
        sender_role: PartyRole,
        body: impl Into<String>,
    ) -> MessagingResult<Self> {
        let body = body.into();
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(MessagingError::InvalidMessage(
                "body is empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_BODY_LEN {
            return Err(MessagingError::InvalidMessage(format!(
                "body exceeds max length ({MAX_BODY_LEN} bytes)"
            )));
        }

        Ok(Self {
            sender_id,
            sender_role,
            body: trimmed.to_string(),
        })
    }

    /// The side of the thread this draft would be sent from.
    #[must_use]
    pub const fn side(&self) -> PartySide {
        self.sender_role.side()
    }
}
