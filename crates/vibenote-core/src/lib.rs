//! vibenote-core - Core library for VibeNote
//!
//! This crate contains the note model, the local note store, the remote
//! backend abstraction, and the sync engine that keeps the two consistent.
//! Front-ends (CLI, mobile, desktop) only talk to [`NoteRepository`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod repository;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{NewNote, Note, NoteId, SyncState, SyncSummary};
pub use repository::{ClaimOutcome, NoteRepository};
pub use sync::{ApplyReport, PushReport, SyncCoordinator};
