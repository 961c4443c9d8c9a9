//! Database layer for VibeNote

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::{NoteStore, NoteWatch};
