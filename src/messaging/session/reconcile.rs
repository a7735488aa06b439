//! Client-side reconciliation for one open conversation.
//!
//! Every surface that displays a thread is a view over one
//! [`ConversationSession`], not a bespoke merge routine. The session merges
//! three inputs — optimistic local sends, server-confirmed rows, and inbound
//! bus events — into a single duplicate-free, chronologically-ordered list.
//!
//! Dedupe is by server-assigned message id: a provisional entry is suppressed
//! as soon as the authoritative row appears, whichever of the persist
//! response or the `message_created` event arrives first.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::messaging::core::errors::MessagingResult;
use crate::messaging::core::ids::{ConversationId, MessageId, ProvisionalId, UserId};
use crate::messaging::core::message::{DraftMessage, Message};
use crate::messaging::core::party::{PartyRole, PartySide, Viewer};
use crate::messaging::realtime::event::ConversationEvent;

/// One entry in a session's merged view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Local identifier assigned at optimistic send; `None` for entries that
    /// arrived already confirmed.
    pub provisional_id: Option<ProvisionalId>,
    /// Server-assigned identifier, once known.
    pub server_id: Option<MessageId>,
    /// Store-assigned position, once known.
    pub seq: Option<i64>,
    /// The sender's user id.
    pub sender_id: UserId,
    /// The sender's role.
    pub sender_role: PartyRole,
    /// Message content.
    pub body: String,
    /// Creation timestamp (local until confirmed, then the server's).
    pub created_at: DateTime<Utc>,
    /// Whether the other side has read this message.
    pub read: bool,
    /// Whether the entry is still awaiting its persist confirmation.
    pub pending: bool,
}

impl SessionMessage {
    /// The side of the thread this entry was sent from.
    #[must_use]
    pub const fn side(&self) -> PartySide {
        self.sender_role.side()
    }

    fn from_confirmed(message: &Message) -> Self {
        Self {
            provisional_id: None,
            server_id: Some(message.id),
            seq: Some(message.seq),
            sender_id: message.sender_id,
            sender_role: message.sender_role,
            body: message.body.clone(),
            created_at: message.created_at,
            read: message.read,
            pending: false,
        }
    }
}

/// What a merged event asks of the surface driving the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionReaction {
    /// Nothing changed (duplicate or foreign event).
    Ignored,
    /// The view changed; re-render.
    Merged,
    /// The view changed and the viewer is actively looking: issue a
    /// mark-read call so the sender sees the message consumed.
    AckNeeded,
    /// Thread-level state changed (reassigned, archived, deleted);
    /// re-fetch the conversation before rendering further.
    Refetch,
}

/// Messages of one calendar day, in chronological order.
#[derive(Clone, Debug, PartialEq)]
pub struct DayGroup {
    /// The calendar date (of `created_at`, UTC).
    pub date: NaiveDate,
    /// The day's messages.
    pub messages: Vec<SessionMessage>,
}

/// Reconciliation state for one open conversation.
pub struct ConversationSession {
    conversation_id: ConversationId,
    viewer: Viewer,
    entries: Vec<SessionMessage>,
    viewing: bool,
}

impl ConversationSession {
    /// Open a session for a conversation, seeded with its fetched history.
    #[must_use]
    pub fn new(conversation_id: ConversationId, viewer: Viewer, history: Vec<Message>) -> Self {
        let mut session = Self {
            conversation_id,
            viewer,
            entries: history.iter().map(SessionMessage::from_confirmed).collect(),
            viewing: false,
        };
        session.sort_entries();
        session
    }

    /// The conversation this session reconciles.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// The viewer this session belongs to.
    #[must_use]
    pub const fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Whether the viewer is actively looking at the thread.
    #[must_use]
    pub const fn is_viewing(&self) -> bool {
        self.viewing
    }

    /// Record whether the thread UI is currently in front of the viewer.
    ///
    /// While true, inbound messages from the other side request an immediate
    /// read acknowledgement (see [`SessionReaction::AckNeeded`]).
    pub fn set_viewing(&mut self, viewing: bool) {
        self.viewing = viewing;
    }

    /// Append an optimistic local send.
    ///
    /// The entry renders immediately; [`ConversationSession::confirm_send`]
    /// or [`ConversationSession::fail_send`] settles it.
    ///
    /// # Errors
    /// Returns an error if the body fails draft validation.
    pub fn begin_send(&mut self, body: impl Into<String>) -> MessagingResult<ProvisionalId> {
        let draft = DraftMessage::new(self.viewer.user_id, self.viewer.role, body)?;
        let provisional_id = ProvisionalId::new();
        self.entries.push(SessionMessage {
            provisional_id: Some(provisional_id),
            server_id: None,
            seq: None,
            sender_id: draft.sender_id,
            sender_role: draft.sender_role,
            body: draft.body,
            created_at: Utc::now(),
            read: false,
            pending: true,
        });
        self.sort_entries();
        Ok(provisional_id)
    }

    /// Settle a provisional entry with its server-confirmed row.
    ///
    /// If the matching `message_created` event already arrived, the
    /// provisional entry is simply dropped; otherwise it is upgraded in
    /// place with the server identity and timestamp.
    pub fn confirm_send(&mut self, provisional_id: ProvisionalId, message: &Message) {
        if self.contains_server_id(message.id) {
            self.entries
                .retain(|entry| entry.provisional_id != Some(provisional_id));
            return;
        }

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.provisional_id == Some(provisional_id))
        {
            entry.server_id = Some(message.id);
            entry.seq = Some(message.seq);
            entry.created_at = message.created_at;
            entry.read = message.read;
            entry.pending = false;
        } else {
            self.entries.push(SessionMessage::from_confirmed(message));
        }
        self.sort_entries();
    }

    /// Roll back a provisional entry after a failed persist.
    ///
    /// Returns the composed body so the surface can keep it in the input for
    /// retry.
    pub fn fail_send(&mut self, provisional_id: ProvisionalId) -> Option<String> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.provisional_id == Some(provisional_id))?;
        Some(self.entries.remove(index).body)
    }

    /// Merge one inbound bus event.
    pub fn apply_event(&mut self, event: &ConversationEvent) -> SessionReaction {
        if event.conversation_id() != self.conversation_id {
            return SessionReaction::Ignored;
        }

        match event {
            ConversationEvent::MessageCreated { message, .. } => self.merge_message(message),
            ConversationEvent::ReadAck { side, .. } => {
                for entry in &mut self.entries {
                    if entry.side() == side.opposite() {
                        entry.read = true;
                    }
                }
                SessionReaction::Merged
            }
            ConversationEvent::Reassigned { .. }
            | ConversationEvent::Archived { .. }
            | ConversationEvent::Deleted { .. } => SessionReaction::Refetch,
        }
    }

    /// The merged, chronologically-ordered view.
    #[must_use]
    pub fn messages(&self) -> &[SessionMessage] {
        &self.entries
    }

    /// The merged view partitioned by calendar date of `created_at`,
    /// chronological within each day.
    #[must_use]
    pub fn grouped_by_date(&self) -> Vec<DayGroup> {
        let mut groups: Vec<DayGroup> = Vec::new();
        for entry in &self.entries {
            let date = entry.created_at.date_naive();
            match groups.last_mut() {
                Some(group) if group.date == date => group.messages.push(entry.clone()),
                _ => groups.push(DayGroup {
                    date,
                    messages: vec![entry.clone()],
                }),
            }
        }
        groups
    }

    fn merge_message(&mut self, message: &Message) -> SessionReaction {
        if self.contains_server_id(message.id) {
            return SessionReaction::Ignored;
        }

        self.entries.push(SessionMessage::from_confirmed(message));
        self.sort_entries();

        if self.viewing && message.side() != self.viewer.side() {
            SessionReaction::AckNeeded
        } else {
            SessionReaction::Merged
        }
    }

    fn contains_server_id(&self, id: MessageId) -> bool {
        self.entries.iter().any(|entry| entry.server_id == Some(id))
    }

    fn sort_entries(&mut self) {
        // Stable sort: unconfirmed entries keep their local order on ties.
        self.entries
            .sort_by_key(|entry| (entry.created_at, entry.seq.unwrap_or(i64::MAX)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::messaging::core::ids::AgencyId;

    fn confirmed(
        conversation_id: ConversationId,
        sender_id: UserId,
        sender_role: PartyRole,
        seq: i64,
        body: &str,
    ) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id,
            seq,
            sender_id,
            sender_role,
            body: body.to_string(),
            created_at: Utc::now(),
            read: false,
        }
    }

    fn client_session() -> (ConversationSession, ConversationId, UserId) {
        let conversation_id = ConversationId::new();
        let client = UserId::new();
        let session = ConversationSession::new(conversation_id, Viewer::client(client), Vec::new());
        (session, conversation_id, client)
    }

    #[test]
    fn test_confirm_before_event_upgrades_in_place() {
        let (mut session, conversation_id, client) = client_session();
        let provisional = session.begin_send("first!").unwrap();
        assert!(session.messages()[0].pending);

        let message = confirmed(conversation_id, client, PartyRole::Client, 1, "first!");
        session.confirm_send(provisional, &message);
        assert_eq!(session.messages().len(), 1);
        assert!(!session.messages()[0].pending);
        assert_eq!(session.messages()[0].server_id, Some(message.id));

        // The bus event for the same row merges idempotently.
        let reaction = session.apply_event(&ConversationEvent::MessageCreated {
            conversation_id,
            message,
        });
        assert_eq!(reaction, SessionReaction::Ignored);
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_event_before_confirm_suppresses_provisional() {
        let (mut session, conversation_id, client) = client_session();
        let provisional = session.begin_send("first!").unwrap();

        let message = confirmed(conversation_id, client, PartyRole::Client, 1, "first!");
        session.apply_event(&ConversationEvent::MessageCreated {
            conversation_id,
            message: message.clone(),
        });
        assert_eq!(session.messages().len(), 2);

        session.confirm_send(provisional, &message);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].server_id, Some(message.id));
    }

    #[test]
    fn test_fail_send_rolls_back_and_returns_body() {
        let (mut session, _conversation_id, _client) = client_session();
        let provisional = session.begin_send("did not make it").unwrap();

        let body = session.fail_send(provisional);
        assert_eq!(body.as_deref(), Some("did not make it"));
        assert!(session.messages().is_empty());
        assert_eq!(session.fail_send(provisional), None);
    }

    #[test]
    fn test_read_ack_flips_counterpart_messages_only() {
        let (mut session, conversation_id, client) = client_session();
        let agent = UserId::new();
        let own = confirmed(conversation_id, client, PartyRole::Client, 1, "ping");
        let theirs = confirmed(conversation_id, agent, PartyRole::Agent, 2, "pong");
        session.apply_event(&ConversationEvent::MessageCreated {
            conversation_id,
            message: own,
        });
        session.apply_event(&ConversationEvent::MessageCreated {
            conversation_id,
            message: theirs,
        });

        // The agent side caught up: the client's sent message flips.
        session.apply_event(&ConversationEvent::ReadAck {
            conversation_id,
            side: PartySide::Agent,
            user_id: agent,
        });

        let by_side: Vec<(PartySide, bool)> = session
            .messages()
            .iter()
            .map(|entry| (entry.side(), entry.read))
            .collect();
        assert_eq!(
            by_side,
            vec![(PartySide::Client, true), (PartySide::Agent, false)]
        );
    }

    #[test]
    fn test_viewing_requests_read_ack_for_inbound_messages() {
        let (mut session, conversation_id, _client) = client_session();
        let agent = UserId::new();

        let reaction = session.apply_event(&ConversationEvent::MessageCreated {
            conversation_id,
            message: confirmed(conversation_id, agent, PartyRole::Agent, 1, "hello"),
        });
        assert_eq!(reaction, SessionReaction::Merged);

        session.set_viewing(true);
        let reaction = session.apply_event(&ConversationEvent::MessageCreated {
            conversation_id,
            message: confirmed(conversation_id, agent, PartyRole::Agent, 2, "anyone?"),
        });
        assert_eq!(reaction, SessionReaction::AckNeeded);
    }

    #[test]
    fn test_own_echo_never_requests_ack() {
        let (mut session, conversation_id, client) = client_session();
        session.set_viewing(true);

        let reaction = session.apply_event(&ConversationEvent::MessageCreated {
            conversation_id,
            message: confirmed(conversation_id, client, PartyRole::Client, 1, "mine"),
        });
        assert_eq!(reaction, SessionReaction::Merged);
    }

    #[test]
    fn test_foreign_conversation_events_ignored() {
        let (mut session, _conversation_id, _client) = client_session();
        let reaction = session.apply_event(&ConversationEvent::Deleted {
            conversation_id: ConversationId::new(),
        });
        assert_eq!(reaction, SessionReaction::Ignored);
    }

    #[test]
    fn test_thread_level_events_request_refetch() {
        let (mut session, conversation_id, _client) = client_session();
        let reaction = session.apply_event(&ConversationEvent::Reassigned { conversation_id });
        assert_eq!(reaction, SessionReaction::Refetch);
    }

    #[test]
    fn test_grouped_by_date_partitions_chronologically() {
        let conversation_id = ConversationId::new();
        let client = UserId::new();
        let agent = UserId::new();
        let monday = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let tuesday = Utc.with_ymd_and_hms(2026, 3, 3, 8, 30, 0).unwrap();

        let history = vec![
            Message {
                id: MessageId::new(),
                conversation_id,
                seq: 1,
                sender_id: client,
                sender_role: PartyRole::Client,
                body: "morning".to_string(),
                created_at: monday,
                read: true,
            },
            Message {
                id: MessageId::new(),
                conversation_id,
                seq: 2,
                sender_id: agent,
                sender_role: PartyRole::Agent,
                body: "following up".to_string(),
                created_at: tuesday,
                read: false,
            },
        ];
        let session =
            ConversationSession::new(conversation_id, Viewer::client(client), history);

        let groups = session.grouped_by_date();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].date, monday.date_naive());
        assert_eq!(groups[0].messages.len(), 1);
        assert_eq!(groups[1].date, tuesday.date_naive());
        assert_eq!(groups[1].messages[0].body, "following up");
    }

    #[test]
    fn test_admin_echo_reads_as_agent_side() {
        let conversation_id = ConversationId::new();
        let agency = AgencyId::new();
        let agent = UserId::new();
        let mut session = ConversationSession::new(
            conversation_id,
            Viewer::agent(agent, agency),
            Vec::new(),
        );
        session.set_viewing(true);

        // An admin message lands on the agent's own side: no self-ack.
        let reaction = session.apply_event(&ConversationEvent::MessageCreated {
            conversation_id,
            message: confirmed(
                conversation_id,
                UserId::new(),
                PartyRole::AgencyAdmin,
                1,
                "taking over this one",
            ),
        });
        assert_eq!(reaction, SessionReaction::Merged);
    }
}
