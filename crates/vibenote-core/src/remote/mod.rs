//! Remote document backend abstraction.
//!
//! The cloud side is a per-owner collection of documents shaped
//! `{content, timestamp}`. Implementations:
//! - [`MemoryBackend`] - in-process collection, used by tests
//! - [`SqliteBackend`] - shared `SQLite` file acting as the cloud for several
//!   local databases on one machine

mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

const CONTENT_FIELD: &str = "content";
const TIMESTAMP_FIELD: &str = "timestamp";

/// Errors reported by a remote backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Remote document not found: {0}")]
    NotFound(String),

    #[error("Remote backend failure: {0}")]
    Backend(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Typed view of a remote document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub content: String,
    /// Unix epoch milliseconds
    pub timestamp: i64,
}

impl RemoteDocument {
    pub fn new(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            content: content.into(),
            timestamp,
        }
    }

    /// Read the typed fields out of a raw document.
    ///
    /// Missing or mistyped fields fall back to an empty body and timestamp 0.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        Self {
            content: fields
                .get(CONTENT_FIELD)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            timestamp: fields
                .get(TIMESTAMP_FIELD)
                .and_then(Value::as_i64)
                .unwrap_or_default(),
        }
    }

    /// Raw field map for a freshly created document
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(CONTENT_FIELD.to_string(), Value::from(self.content.clone()));
        fields.insert(TIMESTAMP_FIELD.to_string(), Value::from(self.timestamp));
        fields
    }
}

/// Partial document for a field-merge update.
///
/// Only the fields that are set are written; every other field of the stored
/// document is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentPatch {
    pub content: Option<String>,
    pub timestamp: Option<i64>,
}

impl DocumentPatch {
    /// Patch that overwrites both synced fields
    pub fn from_document(doc: &RemoteDocument) -> Self {
        Self {
            content: Some(doc.content.clone()),
            timestamp: Some(doc.timestamp),
        }
    }

    /// Merge this patch into a raw document
    pub fn apply_to(&self, fields: &mut Map<String, Value>) {
        if let Some(content) = &self.content {
            fields.insert(CONTENT_FIELD.to_string(), Value::from(content.clone()));
        }
        if let Some(timestamp) = self.timestamp {
            fields.insert(TIMESTAMP_FIELD.to_string(), Value::from(timestamp));
        }
    }
}

/// Kind of a change delivered by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// One document change. For `Removed`, `snapshot` is the last known state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub kind: ChangeKind,
    pub doc_id: String,
    pub snapshot: RemoteDocument,
}

impl RemoteChange {
    pub fn new(kind: ChangeKind, doc_id: impl Into<String>, snapshot: RemoteDocument) -> Self {
        Self {
            kind,
            doc_id: doc_id.into(),
            snapshot,
        }
    }
}

/// One delivery from the change feed: a batch of changes or a listen error.
pub type FeedItem = RemoteResult<Vec<RemoteChange>>;

/// Receiving end of a subscription.
///
/// Dropping the feed unsubscribes; the backend stops delivering once it
/// notices the closed channel.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: mpsc::Receiver<FeedItem>,
}

impl ChangeFeed {
    /// Create a feed and the sender a backend delivers into
    pub fn channel(buffer: usize) -> (mpsc::Sender<FeedItem>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }

    /// Next batch, or `None` once the backend closed the feed
    pub async fn next(&mut self) -> Option<FeedItem> {
        self.rx.recv().await
    }
}

/// Per-owner remote document collection.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Create a document and return its id
    async fn create(&self, owner_id: &str, doc: &RemoteDocument) -> RemoteResult<String>;

    /// Field-merge update of an existing document
    async fn merge_update(
        &self,
        owner_id: &str,
        doc_id: &str,
        patch: &DocumentPatch,
    ) -> RemoteResult<()>;

    /// Delete a document; deleting a missing document is not an error
    async fn delete(&self, owner_id: &str, doc_id: &str) -> RemoteResult<()>;

    /// Subscribe to the owner's collection.
    ///
    /// The first batch is the current collection as `Added` changes.
    async fn subscribe(&self, owner_id: &str) -> RemoteResult<ChangeFeed>;
}
