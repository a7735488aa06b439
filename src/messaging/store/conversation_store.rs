//! Durable conversation and message storage.
//!
//! The store is the single source of truth for thread state. Every
//! multi-row mutation (append plus denormalized update, read sweep,
//! reassignment, dual-hide purge) runs inside one `SQLite` transaction on the
//! store's async connection, so racing requests observe either the whole
//! mutation or none of it.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::messaging::core::config::StorageConfig;
use crate::messaging::core::conversation::{Conversation, HideSlot};
use crate::messaging::core::errors::{MessagingError, MessagingResult};
use crate::messaging::core::ids::{ConversationId, MessageId, PropertyId, UserId};
use crate::messaging::core::message::{DraftMessage, Message};
use crate::messaging::core::party::{PartyRole, PartySide};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request to create (or find) a conversation.
#[derive(Clone, Debug)]
pub struct NewConversation {
    /// The inquiring client.
    pub client_id: UserId,
    /// The responsible agent, when known.
    pub agent_id: Option<UserId>,
    /// The property the inquiry is about, if any.
    pub property_id: Option<PropertyId>,
    /// Optional first message to append.
    pub initial_message: Option<DraftMessage>,
}

/// Result of a create-or-find call.
#[derive(Clone, Debug)]
pub struct CreateOutcome {
    /// The created or pre-existing conversation.
    pub conversation: Conversation,
    /// Whether a new row was created (false when found by identity).
    pub created: bool,
    /// The appended initial message, when one was supplied.
    pub initial_message: Option<Message>,
}

/// Which conversations a list or badge query ranges over.
///
/// Built by the engine after resolving the viewer: an agency admin's scope is
/// the set of agents in their agency, resolved through the directory
/// collaborator.
#[derive(Clone, Debug)]
pub enum ListScope {
    /// Threads where the user is the client.
    Client(UserId),
    /// Threads currently or formerly owned by the agent.
    Agent(UserId),
    /// Threads owned by any of the given agents.
    Agency(Vec<UserId>),
}

impl ListScope {
    /// The thread side this scope reads as.
    #[must_use]
    pub const fn side(&self) -> PartySide {
        match self {
            Self::Client(_) => PartySide::Client,
            Self::Agent(_) | Self::Agency(_) => PartySide::Agent,
        }
    }
}

/// Sort key for conversation lists.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Most recent message activity (falls back to thread update time).
    LastActivity,
    /// Thread creation time.
    CreatedAt,
    /// Threads with unread messages first, then recent activity.
    UnreadFirst,
}

/// Sort direction for conversation lists.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Oldest or lowest first.
    Ascending,
    /// Newest or highest first.
    Descending,
}

impl SortDirection {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Filters, sort, and pagination for a conversation list.
#[derive(Clone, Debug)]
pub struct ListQuery {
    /// Show the archived view (threads the viewer hid) instead of the inbox.
    pub archived: bool,
    /// Case-insensitive substring filter over the last message text.
    pub search: Option<String>,
    /// Restrict to one property.
    pub property_id: Option<PropertyId>,
    /// Sort key.
    pub sort: SortKey,
    /// Sort direction.
    pub direction: SortDirection,
    /// 1-based page number.
    pub page: u32,
    /// Page size (the engine clamps this against configuration).
    pub page_size: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            archived: false,
            search: None,
            property_id: None,
            sort: SortKey::LastActivity,
            direction: SortDirection::Descending,
            page: 1,
            page_size: 20,
        }
    }
}

/// A conversation row annotated with the aggregates every view needs.
#[derive(Clone, Debug)]
pub struct ConversationSummary {
    /// The conversation row.
    pub conversation: Conversation,
    /// Unread count for the querying side.
    pub unread: u64,
    /// Unread client-side messages (status derivation input).
    pub unread_from_client: u64,
    /// Whether any agent-side message exists (status derivation input).
    pub agent_has_replied: bool,
}

/// One page of a conversation list.
#[derive(Clone, Debug)]
pub struct ListPage {
    /// Rows on this page.
    pub items: Vec<ConversationSummary>,
    /// Total rows matching the query across all pages.
    pub total: u64,
    /// The 1-based page number served.
    pub page: u32,
    /// The page size served.
    pub page_size: u32,
}

/// Result of a per-party delete.
#[derive(Clone, Debug)]
pub enum DeleteOutcome {
    /// Only this party had hidden it; the thread stays intact for the other.
    Hidden(Conversation),
    /// Both parties have now hidden it; thread and messages are gone.
    Purged,
}

/// Conversation store trait.
pub trait ConversationStore: Send + Sync {
    /// Create a conversation, or return the existing active one for the same
    /// (client, agent, property) identity tuple.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create_conversation(
        &self,
        request: NewConversation,
    ) -> StoreFuture<'_, MessagingResult<CreateOutcome>>;

    /// Fetch one conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, MessagingResult<Option<Conversation>>>;

    /// Append a message and update the thread's denormalized display fields.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist; `Forbidden` if the
    /// sender is not a current party.
    fn append_message(
        &self,
        id: ConversationId,
        draft: DraftMessage,
    ) -> StoreFuture<'_, MessagingResult<Message>>;

    /// All messages of a conversation in insertion order.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    fn messages(&self, id: ConversationId) -> StoreFuture<'_, MessagingResult<Vec<Message>>>;

    /// One page of conversations for a scope.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_for(
        &self,
        scope: ListScope,
        query: ListQuery,
    ) -> StoreFuture<'_, MessagingResult<ListPage>>;

    /// Mark every unread message from the opposite side as read.
    ///
    /// Returns the number of messages flipped; zero is a successful no-op.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    fn sweep_read(
        &self,
        id: ConversationId,
        side: PartySide,
    ) -> StoreFuture<'_, MessagingResult<u64>>;

    /// Unread count for one side of one conversation.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    fn unread_count(
        &self,
        id: ConversationId,
        side: PartySide,
    ) -> StoreFuture<'_, MessagingResult<u64>>;

    /// Total unread messages across a scope's non-hidden threads (the
    /// navigation badge). Formerly-owned threads do not count: their unread
    /// signal belongs to the new owner.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn unread_total(&self, scope: ListScope) -> StoreFuture<'_, MessagingResult<u64>>;

    /// Record that a side has opened the thread UI at least once (advisory).
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    fn mark_opened(
        &self,
        id: ConversationId,
        side: PartySide,
    ) -> StoreFuture<'_, MessagingResult<()>>;

    /// Set one hide slot.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    fn archive_for_party(
        &self,
        id: ConversationId,
        slot: HideSlot,
    ) -> StoreFuture<'_, MessagingResult<Conversation>>;

    /// Clear one hide slot.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    fn restore_for_party(
        &self,
        id: ConversationId,
        slot: HideSlot,
    ) -> StoreFuture<'_, MessagingResult<Conversation>>;

    /// Hide for one party; when the other party already hid the thread,
    /// delete it and its messages permanently. A reassigned-from agent's
    /// delete only ever hides their own list entry.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    fn delete_for_party(
        &self,
        id: ConversationId,
        slot: HideSlot,
    ) -> StoreFuture<'_, MessagingResult<DeleteOutcome>>;

    /// Transfer ownership to another agent, recording the original owner the
    /// first time.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist; `Conflict` if the
    /// agent side has the thread hidden.
    fn reassign(
        &self,
        id: ConversationId,
        admin_id: UserId,
        new_agent_id: UserId,
    ) -> StoreFuture<'_, MessagingResult<Conversation>>;

    /// Delete every conversation both parties have hidden.
    ///
    /// Returns the ids of the purged threads.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn purge_dual_hidden(&self) -> StoreFuture<'_, MessagingResult<Vec<ConversationId>>>;
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get("id")?,
        client_id: row.get("client_id")?,
        agent_id: row.get("agent_id")?,
        agency_admin_id: row.get("agency_admin_id")?,
        property_id: row.get("property_id")?,
        last_message_body: row.get("last_message_body")?,
        last_message_at: row
            .get::<_, Option<i64>>("last_message_at")?
            .map(millis_to_datetime),
        last_message_sender: row.get("last_message_sender")?,
        hidden_from_client: row.get("hidden_from_client")?,
        hidden_from_agent: row.get("hidden_from_agent")?,
        hidden_from_original_agent: row.get("hidden_from_original_agent")?,
        opened_by_client: row.get("opened_by_client")?,
        opened_by_agent: row.get("opened_by_agent")?,
        original_agent_id: row.get("original_agent_id")?,
        reassigned_by_admin_id: row.get("reassigned_by_admin_id")?,
        reassigned_at: row
            .get::<_, Option<i64>>("reassigned_at")?
            .map(millis_to_datetime),
        created_at: millis_to_datetime(row.get("created_at")?),
        updated_at: millis_to_datetime(row.get("updated_at")?),
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        seq: row.get("seq")?,
        sender_id: row.get("sender_id")?,
        sender_role: row.get("sender_role")?,
        body: row.get("body")?,
        created_at: millis_to_datetime(row.get("created_at")?),
        read: row.get("read_by_other")?,
    })
}

fn fetch_conversation_tx(
    tx: &rusqlite::Transaction<'_>,
    id: ConversationId,
) -> rusqlite::Result<Option<Conversation>> {
    tx.query_row(
        "SELECT * FROM conversations WHERE id = ?1",
        rusqlite::params![id],
        conversation_from_row,
    )
    .optional()
}

fn insert_message_tx(
    tx: &rusqlite::Transaction<'_>,
    conversation_id: ConversationId,
    draft: &DraftMessage,
) -> rusqlite::Result<Message> {
    let id = MessageId::new();
    let created_at = Utc::now();
    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, sender_role, sender_side, body, created_at, read_by_other)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        rusqlite::params![
            id,
            conversation_id,
            draft.sender_id,
            draft.sender_role,
            draft.side(),
            draft.body,
            created_at.timestamp_millis(),
        ],
    )?;
    let seq = tx.last_insert_rowid();

    tx.execute(
        "UPDATE conversations
         SET last_message_body = ?2, last_message_at = ?3, last_message_sender = ?4, updated_at = ?3
         WHERE id = ?1",
        rusqlite::params![
            conversation_id,
            draft.body,
            created_at.timestamp_millis(),
            draft.sender_id,
        ],
    )?;

    Ok(Message {
        id,
        conversation_id,
        seq,
        sender_id: draft.sender_id,
        sender_role: draft.sender_role,
        body: draft.body.clone(),
        created_at,
        read: false,
    })
}

const fn hidden_column(slot: HideSlot) -> &'static str {
    match slot {
        HideSlot::Client => "hidden_from_client",
        HideSlot::Agent => "hidden_from_agent",
        HideSlot::OriginalAgent => "hidden_from_original_agent",
    }
}

const fn opened_column(side: PartySide) -> &'static str {
    match side {
        PartySide::Client => "opened_by_client",
        PartySide::Agent => "opened_by_agent",
    }
}

/// Scope → SQL fragment plus its positional parameters.
fn scope_clause(scope: &ListScope, hidden: bool) -> (String, Vec<Box<dyn ToSql>>) {
    let hidden_flag = i64::from(hidden);
    match scope {
        ListScope::Client(user) => (
            format!("c.client_id = ? AND c.hidden_from_client = {hidden_flag}"),
            vec![Box::new(*user)],
        ),
        ListScope::Agent(user) => (
            format!(
                "((c.agent_id = ? AND c.hidden_from_agent = {hidden_flag})
                  OR (c.original_agent_id = ? AND c.agent_id IS NOT ?
                      AND c.hidden_from_original_agent = {hidden_flag}))"
            ),
            vec![Box::new(*user), Box::new(*user), Box::new(*user)],
        ),
        ListScope::Agency(agents) => {
            let placeholders = vec!["?"; agents.len()].join(", ");
            let params: Vec<Box<dyn ToSql>> = agents
                .iter()
                .map(|agent| Box::new(*agent) as Box<dyn ToSql>)
                .collect();
            (
                format!("c.agent_id IN ({placeholders}) AND c.hidden_from_agent = {hidden_flag}"),
                params,
            )
        }
    }
}

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Connection,
}

impl SqliteConversationStore {
    /// Initialize the store, creating tables on first use.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> MessagingResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    client_id TEXT NOT NULL,
                    agent_id TEXT,
                    agency_admin_id TEXT,
                    property_id TEXT,
                    last_message_body TEXT,
                    last_message_at INTEGER,
                    last_message_sender TEXT,
                    hidden_from_client INTEGER NOT NULL DEFAULT 0,
                    hidden_from_agent INTEGER NOT NULL DEFAULT 0,
                    hidden_from_original_agent INTEGER NOT NULL DEFAULT 0,
                    opened_by_client INTEGER NOT NULL DEFAULT 0,
                    opened_by_agent INTEGER NOT NULL DEFAULT 0,
                    original_agent_id TEXT,
                    reassigned_by_admin_id TEXT,
                    reassigned_at INTEGER,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_conversations_client
                    ON conversations (client_id, hidden_from_client);
                CREATE INDEX IF NOT EXISTS idx_conversations_agent
                    ON conversations (agent_id, hidden_from_agent);
                CREATE TABLE IF NOT EXISTS messages (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    conversation_id TEXT NOT NULL,
                    sender_id TEXT NOT NULL,
                    sender_role TEXT NOT NULL,
                    sender_side TEXT NOT NULL,
                    body TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    read_by_other INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_messages_conversation
                    ON messages (conversation_id, seq);
                CREATE INDEX IF NOT EXISTS idx_messages_unread
                    ON messages (conversation_id, sender_side, read_by_other);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

enum AppendRow {
    Missing,
    NotParty,
    Done(Message),
}

enum ReassignRow {
    Missing,
    HiddenByAgentSide,
    Done(Conversation),
}

impl ConversationStore for SqliteConversationStore {
    fn create_conversation(
        &self,
        request: NewConversation,
    ) -> StoreFuture<'_, MessagingResult<CreateOutcome>> {
        Box::pin(async move {
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;

                    let existing = tx
                        .query_row(
                            "SELECT * FROM conversations
                             WHERE client_id = ?1 AND agent_id IS ?2 AND property_id IS ?3
                               AND NOT (hidden_from_client = 1 AND hidden_from_agent = 1)
                             LIMIT 1",
                            rusqlite::params![
                                request.client_id,
                                request.agent_id,
                                request.property_id
                            ],
                            conversation_from_row,
                        )
                        .optional()?;

                    let (mut conversation, created) = match existing {
                        Some(found) => (found, false),
                        None => {
                            let fresh = Conversation::new(
                                request.client_id,
                                request.agent_id,
                                request.property_id,
                            );
                            tx.execute(
                                "INSERT INTO conversations (
                                    id, client_id, agent_id, agency_admin_id, property_id,
                                    hidden_from_client, hidden_from_agent,
                                    opened_by_client, opened_by_agent,
                                    created_at, updated_at
                                ) VALUES (?1, ?2, ?3, NULL, ?4, 0, 0, 0, 0, ?5, ?5)",
                                rusqlite::params![
                                    fresh.id,
                                    fresh.client_id,
                                    fresh.agent_id,
                                    fresh.property_id,
                                    fresh.created_at.timestamp_millis(),
                                ],
                            )?;
                            (fresh, true)
                        }
                    };

                    let initial_message = match &request.initial_message {
                        Some(draft) => {
                            let message = insert_message_tx(&tx, conversation.id, draft)?;
                            conversation.last_message_body = Some(message.body.clone());
                            conversation.last_message_at = Some(message.created_at);
                            conversation.last_message_sender = Some(message.sender_id);
                            conversation.updated_at = message.created_at;
                            Some(message)
                        }
                        None => None,
                    };

                    tx.commit()?;
                    Ok(CreateOutcome {
                        conversation,
                        created,
                        initial_message,
                    })
                })
                .await?;

            Ok(outcome)
        })
    }

    fn get(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, MessagingResult<Option<Conversation>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            "SELECT * FROM conversations WHERE id = ?1",
                            rusqlite::params![id],
                            conversation_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }

    fn append_message(
        &self,
        id: ConversationId,
        draft: DraftMessage,
    ) -> StoreFuture<'_, MessagingResult<Message>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let Some(conversation) = fetch_conversation_tx(&tx, id)? else {
                        return Ok(AppendRow::Missing);
                    };

                    let is_party = match draft.sender_role {
                        PartyRole::Client => draft.sender_id == conversation.client_id,
                        PartyRole::Agent => Some(draft.sender_id) == conversation.agent_id,
                        // Agency scoping for admins is the resolver's concern;
                        // the store only rejects impossible senders.
                        PartyRole::AgencyAdmin => true,
                    };
                    if !is_party {
                        return Ok(AppendRow::NotParty);
                    }

                    let message = insert_message_tx(&tx, id, &draft)?;
                    tx.commit()?;
                    Ok(AppendRow::Done(message))
                })
                .await?;

            match row {
                AppendRow::Missing => Err(MessagingError::conversation_not_found(id)),
                AppendRow::NotParty => Err(MessagingError::Forbidden(
                    "sender is not a current party".to_string(),
                )),
                AppendRow::Done(message) => Ok(message),
            }
        })
    }

    fn messages(&self, id: ConversationId) -> StoreFuture<'_, MessagingResult<Vec<Message>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let exists: bool = conn.query_row(
                        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )?;
                    if !exists {
                        return Ok(None);
                    }

                    let mut stmt = conn.prepare(
                        "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![id], message_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Some(rows))
                })
                .await?;

            rows.ok_or_else(|| MessagingError::conversation_not_found(id))
        })
    }

    fn list_for(
        &self,
        scope: ListScope,
        query: ListQuery,
    ) -> StoreFuture<'_, MessagingResult<ListPage>> {
        Box::pin(async move {
            if matches!(&scope, ListScope::Agency(agents) if agents.is_empty()) {
                return Ok(ListPage {
                    items: Vec::new(),
                    total: 0,
                    page: query.page.max(1),
                    page_size: query.page_size,
                });
            }

            let page = self
                .conn
                .call(move |conn| {
                    let side = scope.side();
                    let (mut clause, mut params) = scope_clause(&scope, query.archived);

                    if let Some(property_id) = query.property_id {
                        clause.push_str(" AND c.property_id = ?");
                        params.push(Box::new(property_id));
                    }
                    if let Some(search) = &query.search {
                        clause.push_str(" AND c.last_message_body LIKE ?");
                        params.push(Box::new(format!("%{search}%")));
                    }

                    let total: u64 = {
                        let sql = format!("SELECT COUNT(*) FROM conversations c WHERE {clause}");
                        let mut stmt = conn.prepare(&sql)?;
                        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
                        stmt.query_row(&refs[..], |row| row.get::<_, i64>(0))?.max(0) as u64
                    };

                    let direction = query.direction.as_sql();
                    let order = match query.sort {
                        SortKey::LastActivity => format!(
                            "COALESCE(c.last_message_at, c.updated_at) {direction}"
                        ),
                        SortKey::CreatedAt => format!("c.created_at {direction}"),
                        SortKey::UnreadFirst => format!(
                            "(unread > 0) DESC, COALESCE(c.last_message_at, c.updated_at) {direction}"
                        ),
                    };

                    let page_number = query.page.max(1);
                    let limit = i64::from(query.page_size);
                    let offset = i64::from(page_number - 1) * limit;

                    let sql = format!(
                        "SELECT c.*,
                            (SELECT COUNT(*) FROM messages m
                              WHERE m.conversation_id = c.id
                                AND m.sender_side != ?
                                AND m.read_by_other = 0) AS unread,
                            (SELECT COUNT(*) FROM messages m
                              WHERE m.conversation_id = c.id
                                AND m.sender_side = 'client'
                                AND m.read_by_other = 0) AS unread_from_client,
                            EXISTS(SELECT 1 FROM messages m
                              WHERE m.conversation_id = c.id
                                AND m.sender_side = 'agent') AS agent_has_replied
                         FROM conversations c
                         WHERE {clause}
                         ORDER BY {order}
                         LIMIT {limit} OFFSET {offset}"
                    );

                    // The unread subquery parameter precedes the scope params.
                    let mut all_params: Vec<Box<dyn ToSql>> =
                        vec![Box::new(side.as_str().to_string())];
                    all_params.append(&mut params);

                    let mut stmt = conn.prepare(&sql)?;
                    let refs: Vec<&dyn ToSql> = all_params.iter().map(|p| p.as_ref()).collect();
                    let items = stmt
                        .query_map(&refs[..], |row| {
                                Ok(ConversationSummary {
                                    conversation: conversation_from_row(row)?,
                                    unread: row.get::<_, i64>("unread")?.max(0) as u64,
                                    unread_from_client: row
                                        .get::<_, i64>("unread_from_client")?
                                        .max(0)
                                        as u64,
                                    agent_has_replied: row.get("agent_has_replied")?,
                                })
                            })?
                        .collect::<Result<Vec<_>, _>>()?;

                    Ok(ListPage {
                        items,
                        total,
                        page: page_number,
                        page_size: query.page_size,
                    })
                })
                .await?;

            Ok(page)
        })
    }

    fn sweep_read(
        &self,
        id: ConversationId,
        side: PartySide,
    ) -> StoreFuture<'_, MessagingResult<u64>> {
        Box::pin(async move {
            let swept = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    if fetch_conversation_tx(&tx, id)?.is_none() {
                        return Ok(None);
                    }

                    let swept = tx.execute(
                        "UPDATE messages SET read_by_other = 1
                         WHERE conversation_id = ?1 AND sender_side != ?2 AND read_by_other = 0",
                        rusqlite::params![id, side],
                    )?;
                    tx.commit()?;
                    Ok(Some(swept as u64))
                })
                .await?;

            swept.ok_or_else(|| MessagingError::conversation_not_found(id))
        })
    }

    fn unread_count(
        &self,
        id: ConversationId,
        side: PartySide,
    ) -> StoreFuture<'_, MessagingResult<u64>> {
        Box::pin(async move {
            let count = self
                .conn
                .call(move |conn| {
                    let exists: bool = conn.query_row(
                        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )?;
                    if !exists {
                        return Ok(None);
                    }

                    let count: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM messages
                         WHERE conversation_id = ?1 AND sender_side != ?2 AND read_by_other = 0",
                        rusqlite::params![id, side],
                        |row| row.get(0),
                    )?;
                    Ok(Some(count.max(0) as u64))
                })
                .await?;

            count.ok_or_else(|| MessagingError::conversation_not_found(id))
        })
    }

    fn unread_total(&self, scope: ListScope) -> StoreFuture<'_, MessagingResult<u64>> {
        Box::pin(async move {
            if matches!(&scope, ListScope::Agency(agents) if agents.is_empty()) {
                return Ok(0);
            }

            let total = self
                .conn
                .call(move |conn| {
                    let side = scope.side();
                    // The badge ranges over currently-owned threads only.
                    let (clause, params) = match &scope {
                        ListScope::Client(user) => (
                            "c.client_id = ? AND c.hidden_from_client = 0".to_string(),
                            vec![Box::new(*user) as Box<dyn ToSql>],
                        ),
                        ListScope::Agent(user) => (
                            "c.agent_id = ? AND c.hidden_from_agent = 0".to_string(),
                            vec![Box::new(*user) as Box<dyn ToSql>],
                        ),
                        ListScope::Agency(agents) => {
                            let placeholders = vec!["?"; agents.len()].join(", ");
                            (
                                format!(
                                    "c.agent_id IN ({placeholders}) AND c.hidden_from_agent = 0"
                                ),
                                agents
                                    .iter()
                                    .map(|agent| Box::new(*agent) as Box<dyn ToSql>)
                                    .collect(),
                            )
                        }
                    };

                    let sql = format!(
                        "SELECT COUNT(*) FROM messages m
                         JOIN conversations c ON c.id = m.conversation_id
                         WHERE m.sender_side != ? AND m.read_by_other = 0 AND {clause}"
                    );

                    let mut all_params: Vec<Box<dyn ToSql>> =
                        vec![Box::new(side.as_str().to_string())];
                    all_params.extend(params);

                    let mut stmt = conn.prepare(&sql)?;
                    let refs: Vec<&dyn ToSql> = all_params.iter().map(|p| p.as_ref()).collect();
                    let total: i64 = stmt.query_row(&refs[..], |row| row.get(0))?;
                    Ok(total.max(0) as u64)
                })
                .await?;

            Ok(total)
        })
    }

    fn mark_opened(
        &self,
        id: ConversationId,
        side: PartySide,
    ) -> StoreFuture<'_, MessagingResult<()>> {
        Box::pin(async move {
            let changed = self
                .conn
                .call(move |conn| {
                    let column = opened_column(side);
                    let changed = conn.execute(
                        &format!("UPDATE conversations SET {column} = 1 WHERE id = ?1"),
                        rusqlite::params![id],
                    )?;
                    Ok(changed)
                })
                .await?;

            if changed == 0 {
                return Err(MessagingError::conversation_not_found(id));
            }
            Ok(())
        })
    }

    fn archive_for_party(
        &self,
        id: ConversationId,
        slot: HideSlot,
    ) -> StoreFuture<'_, MessagingResult<Conversation>> {
        set_hidden(&self.conn, id, slot, true)
    }

    fn restore_for_party(
        &self,
        id: ConversationId,
        slot: HideSlot,
    ) -> StoreFuture<'_, MessagingResult<Conversation>> {
        set_hidden(&self.conn, id, slot, false)
    }

    fn delete_for_party(
        &self,
        id: ConversationId,
        slot: HideSlot,
    ) -> StoreFuture<'_, MessagingResult<DeleteOutcome>> {
        Box::pin(async move {
            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let Some(conversation) = fetch_conversation_tx(&tx, id)? else {
                        return Ok(None);
                    };

                    let other_party_hid = match slot {
                        HideSlot::Client => conversation.hidden_from_agent,
                        HideSlot::Agent => conversation.hidden_from_client,
                        HideSlot::OriginalAgent => false,
                    };
                    if other_party_hid {
                        tx.execute(
                            "DELETE FROM messages WHERE conversation_id = ?1",
                            rusqlite::params![id],
                        )?;
                        tx.execute(
                            "DELETE FROM conversations WHERE id = ?1",
                            rusqlite::params![id],
                        )?;
                        tx.commit()?;
                        return Ok(Some(DeleteOutcome::Purged));
                    }

                    let column = hidden_column(slot);
                    tx.execute(
                        &format!(
                            "UPDATE conversations SET {column} = 1, updated_at = ?2 WHERE id = ?1"
                        ),
                        rusqlite::params![id, Utc::now().timestamp_millis()],
                    )?;
                    let updated = fetch_conversation_tx(&tx, id)?;
                    tx.commit()?;
                    Ok(updated.map(DeleteOutcome::Hidden))
                })
                .await?;

            outcome.ok_or_else(|| MessagingError::conversation_not_found(id))
        })
    }

    fn reassign(
        &self,
        id: ConversationId,
        admin_id: UserId,
        new_agent_id: UserId,
    ) -> StoreFuture<'_, MessagingResult<Conversation>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let Some(conversation) = fetch_conversation_tx(&tx, id)? else {
                        return Ok(ReassignRow::Missing);
                    };

                    let target_hid = conversation.hidden_from_agent
                        || (conversation.original_agent_id == Some(new_agent_id)
                            && conversation.hidden_from_original_agent);
                    if target_hid {
                        return Ok(ReassignRow::HiddenByAgentSide);
                    }

                    let now = Utc::now().timestamp_millis();
                    tx.execute(
                        "UPDATE conversations
                         SET original_agent_id = COALESCE(original_agent_id, agent_id),
                             agent_id = ?2,
                             agency_admin_id = ?3,
                             reassigned_by_admin_id = ?3,
                             reassigned_at = ?4,
                             updated_at = ?4
                         WHERE id = ?1",
                        rusqlite::params![id, new_agent_id, admin_id, now],
                    )?;
                    let updated = fetch_conversation_tx(&tx, id)?;
                    tx.commit()?;

                    match updated {
                        Some(conversation) => Ok(ReassignRow::Done(conversation)),
                        None => Ok(ReassignRow::Missing),
                    }
                })
                .await?;

            match row {
                ReassignRow::Missing => Err(MessagingError::conversation_not_found(id)),
                ReassignRow::HiddenByAgentSide => Err(MessagingError::Conflict(
                    "conversation is hidden on the agent side".to_string(),
                )),
                ReassignRow::Done(conversation) => Ok(conversation),
            }
        })
    }

    fn purge_dual_hidden(&self) -> StoreFuture<'_, MessagingResult<Vec<ConversationId>>> {
        Box::pin(async move {
            let purged = self
                .conn
                .call(|conn| {
                    let tx = conn.transaction()?;
                    let ids: Vec<ConversationId> = {
                        let mut stmt = tx.prepare(
                            "SELECT id FROM conversations
                             WHERE hidden_from_client = 1 AND hidden_from_agent = 1",
                        )?;
                        stmt.query_map([], |row| row.get(0))?
                            .collect::<Result<Vec<_>, _>>()?
                    };

                    for id in &ids {
                        tx.execute(
                            "DELETE FROM messages WHERE conversation_id = ?1",
                            rusqlite::params![id],
                        )?;
                        tx.execute(
                            "DELETE FROM conversations WHERE id = ?1",
                            rusqlite::params![id],
                        )?;
                    }
                    tx.commit()?;
                    Ok(ids)
                })
                .await?;

            Ok(purged)
        })
    }
}

fn set_hidden<'a>(
    conn: &'a Connection,
    id: ConversationId,
    slot: HideSlot,
    hidden: bool,
) -> StoreFuture<'a, MessagingResult<Conversation>> {
    Box::pin(async move {
        let updated = conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let column = hidden_column(slot);
                let changed = tx.execute(
                    &format!(
                        "UPDATE conversations SET {column} = ?2, updated_at = ?3 WHERE id = ?1"
                    ),
                    rusqlite::params![id, hidden, Utc::now().timestamp_millis()],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let updated = fetch_conversation_tx(&tx, id)?;
                tx.commit()?;
                Ok(updated)
            })
            .await?;

        updated.ok_or_else(|| MessagingError::conversation_not_found(id))
    })
}
