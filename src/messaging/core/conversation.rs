//! Conversation model and derived status.
//!
//! A conversation is the thread of messages about one property between one
//! client and the currently-responsible agent (or their agency). Status is
//! always derived, never stored; every list and detail view goes through the
//! same [`derive_status`] function so the New / Responded / Reassigned
//! classification cannot drift between surfaces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messaging::core::ids::{ConversationId, PropertyId, UserId};
use crate::messaging::core::party::{PartyRole, PartySide, Viewer};

/// Display label used when a thread has no property attached.
pub const GENERAL_INQUIRY_LABEL: &str = "General Inquiry";

/// A conversation thread between a client and the agent side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// The inquiring client. Always present.
    pub client_id: UserId,
    /// The currently-responsible agent; `None` while unassigned.
    pub agent_id: Option<UserId>,
    /// The agency admin involved via reassignment, if any.
    pub agency_admin_id: Option<UserId>,
    /// The property the thread is about; `None` for a general inquiry.
    pub property_id: Option<PropertyId>,
    /// Denormalized body of the most recent message.
    pub last_message_body: Option<String>,
    /// Denormalized timestamp of the most recent message.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Denormalized sender of the most recent message.
    pub last_message_sender: Option<UserId>,
    /// Whether the client has archived (soft-deleted) the thread.
    pub hidden_from_client: bool,
    /// Whether the owning agent side has archived (soft-deleted) the thread.
    pub hidden_from_agent: bool,
    /// Whether the reassigned-from agent has archived their own list entry.
    ///
    /// Meaningful only once a reassignment record exists; it never affects
    /// the current owner's or the client's view.
    pub hidden_from_original_agent: bool,
    /// Advisory flag: the client has opened the thread UI at least once.
    pub opened_by_client: bool,
    /// Advisory flag: the agent side has opened the thread UI at least once.
    pub opened_by_agent: bool,
    /// The agent the thread was transferred away from, if any.
    pub original_agent_id: Option<UserId>,
    /// The admin who performed the transfer, if any.
    pub reassigned_by_admin_id: Option<UserId>,
    /// When the transfer happened, if any.
    pub reassigned_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Which per-party hide flag an archive/restore/delete call targets.
///
/// The agent side carries two slots: the current owner's, and the
/// reassigned-from agent's own list entry. A client always targets their
/// own.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HideSlot {
    /// The client's flag.
    Client,
    /// The owning agent side's flag (agent or admin).
    Agent,
    /// The reassigned-from agent's private flag.
    OriginalAgent,
}

impl Conversation {
    /// Create a fresh conversation with no messages.
    #[must_use]
    pub fn new(
        client_id: UserId,
        agent_id: Option<UserId>,
        property_id: Option<PropertyId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            client_id,
            agent_id,
            agency_admin_id: None,
            property_id,
            last_message_body: None,
            last_message_at: None,
            last_message_sender: None,
            hidden_from_client: false,
            hidden_from_agent: false,
            hidden_from_original_agent: false,
            opened_by_client: false,
            opened_by_agent: false,
            original_agent_id: None,
            reassigned_by_admin_id: None,
            reassigned_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The hidden flag stored in the given slot.
    #[must_use]
    pub const fn hidden_in(&self, slot: HideSlot) -> bool {
        match slot {
            HideSlot::Client => self.hidden_from_client,
            HideSlot::Agent => self.hidden_from_agent,
            HideSlot::OriginalAgent => self.hidden_from_original_agent,
        }
    }

    /// The hide slot a viewer's archive/restore/delete calls target.
    ///
    /// A reassigned-from agent only ever touches their own list entry.
    #[must_use]
    pub fn hide_slot_for(&self, viewer: &Viewer) -> HideSlot {
        match viewer.role {
            PartyRole::Client => HideSlot::Client,
            PartyRole::Agent if self.reassigned_away_from(viewer.user_id) => {
                HideSlot::OriginalAgent
            }
            PartyRole::Agent | PartyRole::AgencyAdmin => HideSlot::Agent,
        }
    }

    /// Whether the thread is hidden from this viewer's own list.
    #[must_use]
    pub fn hidden_for_viewer(&self, viewer: &Viewer) -> bool {
        self.hidden_in(self.hide_slot_for(viewer))
    }

    /// The advisory opened flag for the given side.
    #[must_use]
    pub const fn opened_by(&self, side: PartySide) -> bool {
        match side {
            PartySide::Client => self.opened_by_client,
            PartySide::Agent => self.opened_by_agent,
        }
    }

    /// Whether both parties have hidden the thread, making it eligible for
    /// permanent deletion.
    ///
    /// The parties are the client and the owning agent side; the
    /// reassigned-from agent's private flag never gates deletion.
    #[must_use]
    pub const fn hidden_by_both(&self) -> bool {
        self.hidden_from_client && self.hidden_from_agent
    }

    /// Whether ownership has been transferred away from the original agent.
    #[must_use]
    pub const fn is_reassigned(&self) -> bool {
        self.original_agent_id.is_some()
    }

    /// Whether the given agent lost this thread through reassignment.
    #[must_use]
    pub fn reassigned_away_from(&self, agent: UserId) -> bool {
        self.original_agent_id == Some(agent) && self.agent_id != Some(agent)
    }
}

/// Derived conversation status.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// An unhandled client inquiry: no agent reply yet, or the client has
    /// followed up since the last reply.
    New,
    /// The agent side has replied and no unread client message remains.
    Responded,
    /// Viewed from the original agent's perspective after a transfer.
    Reassigned,
}

impl ConversationStatus {
    /// Stable string representation (for storage and display).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Responded => "responded",
            Self::Reassigned => "reassigned",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive the status of a conversation as seen by a viewer.
///
/// Inputs beyond the row itself are computed by the store from the message
/// table: `unread_from_client` is the number of unread client-side messages,
/// `agent_has_replied` whether any agent-side message exists.
#[must_use]
pub fn derive_status(
    conversation: &Conversation,
    viewer: &Viewer,
    unread_from_client: u64,
    agent_has_replied: bool,
) -> ConversationStatus {
    if viewer.side() == PartySide::Agent && conversation.reassigned_away_from(viewer.user_id) {
        return ConversationStatus::Reassigned;
    }

    if agent_has_replied && unread_from_client == 0 {
        return ConversationStatus::Responded;
    }

    ConversationStatus::New
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::core::ids::AgencyId;

    fn sample() -> Conversation {
        Conversation::new(UserId::new(), Some(UserId::new()), Some(PropertyId::new()))
    }

    #[test]
    fn test_new_conversation_visible_to_both() {
        let conv = sample();
        assert!(!conv.hidden_in(HideSlot::Client));
        assert!(!conv.hidden_in(HideSlot::Agent));
        assert!(!conv.hidden_by_both());
    }

    #[test]
    fn test_hide_slot_follows_relationship() {
        let mut conv = sample();
        let original = conv.agent_id.unwrap();
        let agency = AgencyId::new();

        assert_eq!(
            conv.hide_slot_for(&Viewer::client(conv.client_id)),
            HideSlot::Client
        );
        assert_eq!(
            conv.hide_slot_for(&Viewer::agent(original, agency)),
            HideSlot::Agent
        );

        let replacement = UserId::new();
        conv.original_agent_id = Some(original);
        conv.agent_id = Some(replacement);

        assert_eq!(
            conv.hide_slot_for(&Viewer::agent(original, agency)),
            HideSlot::OriginalAgent
        );
        assert_eq!(
            conv.hide_slot_for(&Viewer::agent(replacement, agency)),
            HideSlot::Agent
        );
        assert_eq!(
            conv.hide_slot_for(&Viewer::agency_admin(UserId::new(), agency)),
            HideSlot::Agent
        );
    }

    #[test]
    fn test_original_agent_hide_does_not_gate_deletion() {
        let mut conv = sample();
        conv.hidden_from_client = true;
        conv.hidden_from_original_agent = true;
        assert!(!conv.hidden_by_both());

        conv.hidden_from_agent = true;
        assert!(conv.hidden_by_both());
    }

    #[test]
    fn test_status_new_before_any_reply() {
        let conv = sample();
        let viewer = Viewer::client(conv.client_id);
        assert_eq!(derive_status(&conv, &viewer, 1, false), ConversationStatus::New);
        assert_eq!(derive_status(&conv, &viewer, 0, false), ConversationStatus::New);
    }

    #[test]
    fn test_status_responded_when_caught_up() {
        let conv = sample();
        let viewer = Viewer::client(conv.client_id);
        assert_eq!(
            derive_status(&conv, &viewer, 0, true),
            ConversationStatus::Responded
        );
    }

    #[test]
    fn test_status_new_again_after_client_follow_up() {
        let conv = sample();
        let viewer = Viewer::client(conv.client_id);
        assert_eq!(derive_status(&conv, &viewer, 2, true), ConversationStatus::New);
    }

    #[test]
    fn test_status_reassigned_for_original_agent_only() {
        let mut conv = sample();
        let original = conv.agent_id.unwrap();
        let replacement = UserId::new();
        conv.original_agent_id = Some(original);
        conv.agent_id = Some(replacement);

        let agency = AgencyId::new();
        let original_view = Viewer::agent(original, agency);
        let replacement_view = Viewer::agent(replacement, agency);

        assert_eq!(
            derive_status(&conv, &original_view, 0, true),
            ConversationStatus::Reassigned
        );
        assert_eq!(
            derive_status(&conv, &replacement_view, 0, true),
            ConversationStatus::Responded
        );
    }
}
