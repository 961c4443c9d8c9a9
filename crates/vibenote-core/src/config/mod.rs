//! Tunables for the sync engine.
//!
//! Front-ends persist these inside their own config files and hand them to
//! [`crate::NoteRepository`] and [`crate::remote::SqliteBackend`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_FEED_BUFFER: usize = 32;

/// Sync engine settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Capacity of the repository's background task queue
    pub queue_capacity: usize,
    /// How often polling change feeds check for new remote changes
    pub poll_interval_ms: u64,
    /// Number of undelivered change batches a feed may buffer
    pub feed_buffer: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }
}

impl SyncSettings {
    /// Poll interval as a [`Duration`]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings that would stall the engine
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidInput(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidInput(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.feed_buffer == 0 {
            return Err(Error::InvalidInput(
                "feed_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
