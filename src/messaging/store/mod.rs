//! Durable conversation storage: trait and `SQLite` backend.

pub mod conversation_store;

pub use conversation_store::{
    ConversationStore, ConversationSummary, CreateOutcome, DeleteOutcome, ListPage, ListQuery,
    ListScope, NewConversation, SortDirection, SortKey, SqliteConversationStore, StoreFuture,
};
