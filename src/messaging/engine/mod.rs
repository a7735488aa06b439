//! Orchestration facade for the messaging core.

pub mod core;

pub use core::{
    InboxEntry, InboxPage, InquiryRequest, MessagingBackends, MessagingEngine, OpenConversation,
};
