//! Background maintenance for conversation storage.

pub mod purge;

pub use purge::{PurgeStats, PurgeWorker};
