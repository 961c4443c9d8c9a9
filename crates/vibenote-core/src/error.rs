//! Error types for vibenote-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using vibenote-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vibenote-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(i64),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Remote backend error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The repository's background queue has shut down
    #[error("Background sync queue is closed")]
    QueueClosed,
}
