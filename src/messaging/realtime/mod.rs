//! Realtime fan-out: per-conversation broadcast rooms and their events.

pub mod bus;
pub mod event;

pub use bus::{EventBus, Subscription, SubscriptionLoss};
pub use event::ConversationEvent;
