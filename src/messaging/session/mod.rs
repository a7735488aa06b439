//! Client-side reconciliation for open conversations.

pub mod reconcile;

pub use reconcile::{ConversationSession, DayGroup, SessionMessage, SessionReaction};
