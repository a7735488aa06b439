//! Visibility and reassignment resolution.
//!
//! A pure function of (conversation, viewer) → access level, applied on both
//! the list/query path and inside every mutating operation. The realtime bus
//! never gates anything; this resolver is the single authorization seam of
//! the messaging core.

use serde::{Deserialize, Serialize};

use crate::messaging::core::conversation::Conversation;
use crate::messaging::core::party::{PartyRole, Viewer};

/// Access level of a viewer on a conversation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// The conversation does not appear for this viewer at all.
    NotVisible,
    /// History is readable; sending and consuming the unread signal are not
    /// allowed. Archiving the thread off the viewer's own list is.
    ViewOnly,
    /// Full read-write access.
    FullAccess,
}

impl Access {
    /// Whether the conversation appears for the viewer.
    #[must_use]
    pub const fn is_visible(self) -> bool {
        !matches!(self, Self::NotVisible)
    }

    /// Whether the viewer may append messages.
    #[must_use]
    pub const fn can_write(self) -> bool {
        matches!(self, Self::FullAccess)
    }

    /// Whether the viewer may run a read sweep on their own behalf.
    ///
    /// A reassigned-from agent must not silently consume the client's unread
    /// signal intended for the new owner.
    #[must_use]
    pub const fn can_consume_unread(self) -> bool {
        matches!(self, Self::FullAccess)
    }

    /// Whether the viewer may archive/restore/delete their own list entry.
    #[must_use]
    pub const fn can_archive(self) -> bool {
        self.is_visible()
    }
}

/// Resolve the access level of `viewer` on `conversation`.
///
/// `admin_same_agency` must be pre-computed through the agency-membership
/// collaborator: whether the viewer (when an admin) belongs to the same
/// agency as the conversation's *current* agent. `include_archived` is true
/// when the caller explicitly requested the archived view, in which case a
/// thread hidden by the viewer's own side stays visible (restorable) instead
/// of disappearing.
#[must_use]
pub fn resolve(
    conversation: &Conversation,
    viewer: &Viewer,
    admin_same_agency: bool,
    include_archived: bool,
) -> Access {
    if conversation.hidden_for_viewer(viewer) && !include_archived {
        return Access::NotVisible;
    }

    match viewer.role {
        PartyRole::Client if viewer.user_id == conversation.client_id => Access::FullAccess,
        PartyRole::AgencyAdmin if admin_same_agency => Access::FullAccess,
        PartyRole::Agent if Some(viewer.user_id) == conversation.agent_id => Access::FullAccess,
        PartyRole::Agent if conversation.reassigned_away_from(viewer.user_id) => Access::ViewOnly,
        _ => Access::NotVisible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::core::ids::{AgencyId, PropertyId, UserId};

    fn conversation_with_agent(agent: UserId) -> Conversation {
        Conversation::new(UserId::new(), Some(agent), Some(PropertyId::new()))
    }

    #[test]
    fn test_client_has_full_access() {
        let conv = conversation_with_agent(UserId::new());
        let access = resolve(&conv, &Viewer::client(conv.client_id), false, false);
        assert_eq!(access, Access::FullAccess);
    }

    #[test]
    fn test_stranger_client_not_visible() {
        let conv = conversation_with_agent(UserId::new());
        let access = resolve(&conv, &Viewer::client(UserId::new()), false, false);
        assert_eq!(access, Access::NotVisible);
    }

    #[test]
    fn test_current_agent_has_full_access() {
        let agent = UserId::new();
        let conv = conversation_with_agent(agent);
        let access = resolve(&conv, &Viewer::agent(agent, AgencyId::new()), false, false);
        assert_eq!(access, Access::FullAccess);
    }

    #[test]
    fn test_reassigned_from_agent_is_view_only() {
        let original = UserId::new();
        let mut conv = conversation_with_agent(original);
        conv.original_agent_id = Some(original);
        conv.agent_id = Some(UserId::new());

        let access = resolve(&conv, &Viewer::agent(original, AgencyId::new()), false, false);
        assert_eq!(access, Access::ViewOnly);
        assert!(!access.can_write());
        assert!(!access.can_consume_unread());
        assert!(access.can_archive());
    }

    #[test]
    fn test_admin_access_requires_agency_match() {
        let conv = conversation_with_agent(UserId::new());
        let admin = Viewer::agency_admin(UserId::new(), AgencyId::new());
        assert_eq!(resolve(&conv, &admin, true, false), Access::FullAccess);
        assert_eq!(resolve(&conv, &admin, false, false), Access::NotVisible);
    }

    #[test]
    fn test_hidden_governs_unless_archived_view_requested() {
        let mut conv = conversation_with_agent(UserId::new());
        conv.hidden_from_client = true;
        let client = Viewer::client(conv.client_id);

        assert_eq!(resolve(&conv, &client, false, false), Access::NotVisible);
        assert_eq!(resolve(&conv, &client, false, true), Access::FullAccess);
    }

    #[test]
    fn test_original_agent_archive_hides_only_their_own_view() {
        let original = UserId::new();
        let replacement = UserId::new();
        let mut conv = conversation_with_agent(original);
        conv.original_agent_id = Some(original);
        conv.agent_id = Some(replacement);
        conv.hidden_from_original_agent = true;

        let agency = AgencyId::new();
        assert_eq!(
            resolve(&conv, &Viewer::agent(original, agency), false, false),
            Access::NotVisible
        );
        // In the archived view the entry is still view-only, not writable.
        assert_eq!(
            resolve(&conv, &Viewer::agent(original, agency), false, true),
            Access::ViewOnly
        );
        // The new owner is unaffected by the former owner's archive.
        assert_eq!(
            resolve(&conv, &Viewer::agent(replacement, agency), false, false),
            Access::FullAccess
        );
    }

    #[test]
    fn test_hide_is_independent_per_side() {
        let agent = UserId::new();
        let mut conv = conversation_with_agent(agent);
        conv.hidden_from_client = true;

        let access = resolve(&conv, &Viewer::agent(agent, AgencyId::new()), false, false);
        assert_eq!(access, Access::FullAccess);
    }
}
