//! Configuration for the messaging core.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::messaging::core::errors::{MessagingError, MessagingResult};

/// Top-level configuration for the messaging engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Realtime fan-out settings.
    pub realtime: RealtimeConfig,
    /// Conversation list pagination settings.
    pub listing: ListingConfig,
    /// Dual-hidden purge worker settings.
    pub purge: PurgeConfig,
}

impl MessagingConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> MessagingResult<()> {
        if self.realtime.channel_capacity == 0 {
            return Err(MessagingError::InvalidConfig(
                "realtime.channel_capacity must be > 0".to_string(),
            ));
        }

        if self.listing.default_page_size == 0 {
            return Err(MessagingError::InvalidConfig(
                "listing.default_page_size must be > 0".to_string(),
            ));
        }

        if self.listing.max_page_size < self.listing.default_page_size {
            return Err(MessagingError::InvalidConfig(
                "listing.max_page_size must be >= listing.default_page_size".to_string(),
            ));
        }

        if self.purge.interval_seconds == 0 {
            return Err(MessagingError::InvalidConfig(
                "purge.interval_seconds must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Storage configuration for conversation data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("propline.sqlite"),
        }
    }
}

/// Realtime fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Broadcast channel capacity per conversation room.
    ///
    /// A receiver that falls further behind than this observes loss and must
    /// re-fetch from the store.
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

/// Conversation list pagination settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListingConfig {
    /// Page size when the caller does not specify one.
    pub default_page_size: u32,
    /// Hard ceiling on the page size a caller may request.
    pub max_page_size: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Dual-hidden purge worker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Interval between purge runs (in seconds).
    pub interval_seconds: u64,
    /// Whether the background purge worker is enabled.
    pub enabled: bool,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600, // 1 hour
            enabled: true,
        }
    }
}
