//! Read-receipt tracking and unread derivation.

pub mod tracker;

pub use tracker::ReadTracker;
