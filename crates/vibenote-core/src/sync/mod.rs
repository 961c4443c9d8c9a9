//! Sync engine: push local changes, listen for remote ones.

mod coordinator;
mod report;

pub use coordinator::SyncCoordinator;
pub use report::{ApplyReport, PushReport};
