//! Data models for VibeNote

mod note;

pub use note::{NewNote, Note, NoteId, SyncState, SyncSummary};
