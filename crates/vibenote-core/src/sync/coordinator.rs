//! Push and listen protocols between the local store and a remote backend.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{ApplyReport, PushReport};
use crate::db::NoteStore;
use crate::error::{Error, Result};
use crate::models::{Note, SyncState};
use crate::remote::{
    ChangeFeed, ChangeKind, DocumentPatch, RemoteBackend, RemoteChange, RemoteDocument,
};

/// What happened to one note during a push
enum PushOutcome {
    Created,
    Updated,
    EditedMeanwhile,
    Discarded,
}

/// The running listener. Dropping it aborts the drain task.
struct Listener {
    owner_id: String,
    task: JoinHandle<()>,
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns the push (local to remote) and listen (remote to local) protocols.
///
/// Pushes on one coordinator never overlap, and at most one listener is
/// active at a time.
pub struct SyncCoordinator {
    store: Arc<NoteStore>,
    remote: Arc<dyn RemoteBackend>,
    push_lock: Mutex<()>,
    listener: Mutex<Option<Listener>>,
}

fn require_owner(owner_id: &str) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(Error::InvalidInput("owner id must not be empty".to_string()));
    }
    Ok(())
}

impl SyncCoordinator {
    pub fn new(store: Arc<NoteStore>, remote: Arc<dyn RemoteBackend>) -> Self {
        Self {
            store,
            remote,
            push_lock: Mutex::new(()),
            listener: Mutex::new(None),
        }
    }

    /// The local store this coordinator writes into
    pub fn store(&self) -> &Arc<NoteStore> {
        &self.store
    }

    /// Push every pending note of `owner_id`.
    ///
    /// Runs are serialized; a second caller waits for the first to finish and
    /// then sees whatever is still pending. A failure on one note is logged and
    /// counted without stopping the rest of the batch.
    pub async fn push(&self, owner_id: &str) -> Result<PushReport> {
        require_owner(owner_id)?;
        let _running = self.push_lock.lock().await;

        let pending = self.store.list_pending_for_owner(owner_id).await?;
        if pending.is_empty() {
            return Ok(PushReport::default());
        }

        let mut report = PushReport::default();
        for note in &pending {
            match self.push_note(owner_id, note).await {
                Ok(PushOutcome::Created) => report.created += 1,
                Ok(PushOutcome::Updated) => report.updated += 1,
                Ok(PushOutcome::EditedMeanwhile) => report.left_pending += 1,
                Ok(PushOutcome::Discarded) => report.discarded += 1,
                Err(error) => {
                    tracing::warn!(note_id = %note.id, owner_id, %error, "Failed to push note");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(owner_id, %report, "Push finished");
        Ok(report)
    }

    async fn push_note(&self, owner_id: &str, note: &Note) -> Result<PushOutcome> {
        let doc = RemoteDocument::new(note.content.clone(), note.timestamp);

        let (remote_id, created) = match note.remote_id.as_deref() {
            Some(remote_id) => {
                self.remote
                    .merge_update(owner_id, remote_id, &DocumentPatch::from_document(&doc))
                    .await?;
                (remote_id.to_string(), false)
            }
            None => (self.remote.create(owner_id, &doc).await?, true),
        };

        match self
            .store
            .mark_pushed(note.id, &remote_id, &note.content, note.timestamp)
            .await
        {
            Ok(SyncState::Synced) if created => Ok(PushOutcome::Created),
            Ok(SyncState::Synced) => Ok(PushOutcome::Updated),
            Ok(SyncState::Pending) => {
                tracing::debug!(note_id = %note.id, "Note edited during push; left pending");
                Ok(PushOutcome::EditedMeanwhile)
            }
            Err(Error::NotFound(_)) => {
                tracing::debug!(note_id = %note.id, %remote_id, "Note deleted during push");
                if created {
                    self.push_delete(owner_id, &remote_id).await;
                }
                Ok(PushOutcome::Discarded)
            }
            Err(error) => Err(error),
        }
    }

    /// Delete a remote document. Failures are logged, never returned.
    pub async fn push_delete(&self, owner_id: &str, remote_id: &str) {
        match self.remote.delete(owner_id, remote_id).await {
            Ok(()) => tracing::debug!(owner_id, remote_id, "Deleted remote document"),
            Err(error) => {
                tracing::warn!(owner_id, remote_id, %error, "Failed to delete remote document");
            }
        }
    }

    /// Start listening to `owner_id`'s collection, replacing any previous listener
    pub async fn listen(&self, owner_id: &str) -> Result<()> {
        require_owner(owner_id)?;
        let mut listener = self.listener.lock().await;

        if let Some(previous) = listener.take() {
            tracing::debug!(owner_id = %previous.owner_id, "Stopping previous listener");
        }

        let feed = self.remote.subscribe(owner_id).await?;
        let task = tokio::spawn(drain_feed(
            Arc::clone(&self.store),
            owner_id.to_string(),
            feed,
        ));
        *listener = Some(Listener {
            owner_id: owner_id.to_string(),
            task,
        });

        tracing::info!(owner_id, "Listening for remote changes");
        Ok(())
    }

    /// Stop the active listener, if any
    pub async fn stop(&self) {
        if let Some(previous) = self.listener.lock().await.take() {
            tracing::info!(owner_id = %previous.owner_id, "Stopped listening");
        }
    }

    /// Owner of the listener that is still running
    pub async fn listening_owner(&self) -> Option<String> {
        self.listener
            .lock()
            .await
            .as_ref()
            .filter(|listener| !listener.task.is_finished())
            .map(|listener| listener.owner_id.clone())
    }

    /// Fetch the current remote collection once and apply it
    pub async fn pull(&self, owner_id: &str) -> Result<ApplyReport> {
        require_owner(owner_id)?;
        let mut feed = self.remote.subscribe(owner_id).await?;
        let changes = match feed.next().await {
            Some(item) => item?,
            None => Vec::new(),
        };
        Ok(apply_batch(&self.store, owner_id, &changes).await)
    }

    /// Apply one batch of remote changes for `owner_id`
    pub async fn apply_changes(&self, owner_id: &str, changes: &[RemoteChange]) -> ApplyReport {
        apply_batch(&self.store, owner_id, changes).await
    }
}

async fn drain_feed(store: Arc<NoteStore>, owner_id: String, mut feed: ChangeFeed) {
    while let Some(item) = feed.next().await {
        match item {
            Ok(changes) => {
                let report = apply_batch(&store, &owner_id, &changes).await;
                if report.changed_anything() {
                    tracing::debug!(%owner_id, %report, "Applied remote changes");
                }
            }
            Err(error) => {
                tracing::warn!(%owner_id, %error, "Remote listener failed");
                return;
            }
        }
    }
    tracing::debug!(%owner_id, "Remote change feed closed");
}

enum Applied {
    Inserted,
    Updated,
    Matched,
    Removed,
    Ignored,
}

async fn apply_batch(store: &NoteStore, owner_id: &str, changes: &[RemoteChange]) -> ApplyReport {
    let mut report = ApplyReport::default();
    for change in changes {
        match apply_change(store, owner_id, change).await {
            Ok(Applied::Inserted) => report.inserted += 1,
            Ok(Applied::Updated) => report.updated += 1,
            Ok(Applied::Matched) => report.matched += 1,
            Ok(Applied::Removed) => report.removed += 1,
            Ok(Applied::Ignored) => report.ignored += 1,
            Err(error) => {
                tracing::warn!(
                    owner_id,
                    doc_id = %change.doc_id,
                    %error,
                    "Failed to apply remote change"
                );
                report.failed += 1;
            }
        }
    }
    report
}

async fn apply_change(store: &NoteStore, owner_id: &str, change: &RemoteChange) -> Result<Applied> {
    let RemoteChange {
        kind,
        doc_id,
        snapshot,
    } = change;

    if *kind == ChangeKind::Removed {
        let removed = store.delete_by_remote_id(owner_id, doc_id).await?;
        return Ok(if removed {
            Applied::Removed
        } else {
            Applied::Ignored
        });
    }

    if let Some(existing) = store.find_by_remote_id(owner_id, doc_id).await? {
        let applied = store
            .apply_remote(existing.id, &snapshot.content, snapshot.timestamp)
            .await?;
        return Ok(if applied {
            Applied::Updated
        } else {
            Applied::Ignored
        });
    }

    // A push may have created this document before recording its id locally.
    if let Some(duplicate) = store
        .find_duplicate(owner_id, &snapshot.content, snapshot.timestamp)
        .await?
    {
        tracing::debug!(note_id = %duplicate.id, %doc_id, "Matched remote document to local note");
        store.mark_synced(duplicate.id, doc_id).await?;
        return Ok(Applied::Matched);
    }

    store
        .insert_synced(owner_id, doc_id, &snapshot.content, snapshot.timestamp)
        .await?;
    Ok(Applied::Inserted)
}
