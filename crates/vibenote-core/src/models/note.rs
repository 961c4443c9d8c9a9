//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Local primary key of a note, assigned by the store on insert and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(i64);

impl NoteId {
    /// Wrap a raw row id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw row id
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Whether the local copy of a note is confirmed on the remote side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local state not yet confirmed remote
    #[default]
    Pending,
    /// Local state matches the last known remote state
    Synced,
}

impl SyncState {
    /// Map the persisted `is_synced` flag
    #[must_use]
    pub const fn from_flag(is_synced: bool) -> Self {
        if is_synced {
            Self::Synced
        } else {
            Self::Pending
        }
    }

    /// Persisted `is_synced` flag
    #[must_use]
    pub const fn is_synced(self) -> bool {
        matches!(self, Self::Synced)
    }
}

/// A note in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Local identifier
    pub id: NoteId,
    /// Id of the correlated remote document, once pushed or received
    pub remote_id: Option<String>,
    /// Owning identity; `None` until claimed by a signed-in user
    pub owner_id: Option<String>,
    /// Plain text content
    pub content: String,
    /// Creation/modification timestamp (Unix ms), used for last-writer-wins
    pub timestamp: i64,
    /// Local sync state
    pub sync_state: SyncState,
}

impl Note {
    /// Whether the note is confirmed on the remote side
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.sync_state.is_synced()
    }
}

/// Fields for a note that has not been inserted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNote {
    pub owner_id: Option<String>,
    pub content: String,
    pub timestamp: i64,
}

impl NewNote {
    /// Create a pending note stamped with the current time
    #[must_use]
    pub fn new(content: impl Into<String>, owner_id: Option<String>) -> Self {
        Self {
            owner_id,
            content: content.into(),
            timestamp: crate::util::unix_millis_now(),
        }
    }

    /// Override the timestamp
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Note counts by sync state, for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: usize,
    pub pending: usize,
    pub synced: usize,
    pub unowned: usize,
}
