//! Note repository: the façade front-ends talk to.
//!
//! Mutations are written locally first. Remote work is handed to a bounded
//! queue drained by one background worker, so callers never wait on the
//! network.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SyncSettings;
use crate::db::{NoteStore, NoteWatch};
use crate::error::{Error, Result};
use crate::models::{NewNote, Note, NoteId, SyncState, SyncSummary};
use crate::remote::RemoteBackend;
use crate::sync::{PushReport, SyncCoordinator};
use crate::util::{next_edit_timestamp, normalize_text_option};

#[derive(Debug)]
enum SyncTask {
    Push(String),
    DeleteRemote { owner_id: String, remote_id: String },
    Flush(oneshot::Sender<()>),
}

/// Result of claiming unowned notes for a signed-in owner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub claimed: usize,
    pub push: PushReport,
}

/// Composes the local store and the sync coordinator.
pub struct NoteRepository {
    store: Arc<NoteStore>,
    sync: Arc<SyncCoordinator>,
    tasks: mpsc::Sender<SyncTask>,
    worker: JoinHandle<()>,
}

fn normalize_owner(owner_id: Option<&str>) -> Option<String> {
    normalize_text_option(owner_id.map(ToOwned::to_owned))
}

fn require_owner(owner_id: &str) -> Result<String> {
    normalize_owner(Some(owner_id))
        .ok_or_else(|| Error::InvalidInput("owner id must not be empty".to_string()))
}

impl NoteRepository {
    /// Build a repository and start its background worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<NoteStore>,
        remote: Arc<dyn RemoteBackend>,
        settings: &SyncSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let sync = Arc::new(SyncCoordinator::new(Arc::clone(&store), remote));
        let (tasks, queue) = mpsc::channel(settings.queue_capacity);
        let worker = tokio::spawn(run_worker(Arc::clone(&sync), queue));

        Ok(Self {
            store,
            sync,
            tasks,
            worker,
        })
    }

    /// The underlying sync coordinator
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    /// Queue a push without waiting.
    ///
    /// A full queue drops the trigger. The note stays pending and is pushed by
    /// the next trigger for its owner (any later write, `claim` or `resync`).
    fn trigger_push(&self, owner_id: &str) {
        match self.tasks.try_send(SyncTask::Push(owner_id.to_string())) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(owner_id, "Sync queue full; push trigger dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(owner_id, "Sync worker stopped; push trigger dropped");
            }
        }
    }

    /// Create a note and schedule a push when it has an owner
    pub async fn insert(&self, content: &str, owner_id: Option<&str>) -> Result<Note> {
        let owner_id = normalize_owner(owner_id);
        let note = self
            .store
            .insert(&NewNote::new(content, owner_id.clone()))
            .await?;
        tracing::debug!(note_id = %note.id, "Inserted note");

        if let Some(owner_id) = owner_id.as_deref() {
            self.trigger_push(owner_id);
        }
        Ok(note)
    }

    /// Save an edited note and schedule a push when it has an owner.
    ///
    /// The new timestamp is strictly greater than the stored one so the edit
    /// wins last-writer-wins against the state it replaces.
    pub async fn update(&self, note: &Note, owner_id: Option<&str>) -> Result<Note> {
        let stored = self
            .store
            .get(note.id)
            .await?
            .ok_or(Error::NotFound(note.id.get()))?;

        let owner_id = normalize_owner(owner_id);
        let updated = Note {
            owner_id: owner_id.clone(),
            content: note.content.clone(),
            timestamp: next_edit_timestamp(stored.timestamp),
            sync_state: SyncState::Pending,
            ..stored
        };
        self.store.update(&updated).await?;
        tracing::debug!(note_id = %updated.id, "Updated note");

        if let Some(owner_id) = owner_id.as_deref() {
            self.trigger_push(owner_id);
        }
        Ok(updated)
    }

    /// Delete a note locally, then remotely if it was ever synced.
    ///
    /// Returns whether a local note was removed.
    pub async fn delete(&self, note: &Note) -> Result<bool> {
        let Some(stored) = self.store.get(note.id).await? else {
            return Ok(false);
        };
        if !self.store.delete(stored.id).await? {
            return Ok(false);
        }
        tracing::debug!(note_id = %stored.id, "Deleted note");

        if let (Some(owner_id), Some(remote_id)) = (stored.owner_id, stored.remote_id) {
            self.tasks
                .send(SyncTask::DeleteRemote {
                    owner_id,
                    remote_id,
                })
                .await
                .map_err(|_| Error::QueueClosed)?;
        }
        Ok(true)
    }

    /// Hand every unowned note to `owner_id` and push them right away
    pub async fn claim(&self, owner_id: &str) -> Result<ClaimOutcome> {
        let owner_id = require_owner(owner_id)?;
        let claimed = self.store.claim_unowned(&owner_id).await?;
        if claimed > 0 {
            tracing::info!(%owner_id, claimed, "Claimed unowned notes");
        }

        let push = self.sync.push(&owner_id).await?;
        Ok(ClaimOutcome { claimed, push })
    }

    /// Start applying remote changes for `owner_id`
    pub async fn start_sync(&self, owner_id: &str) -> Result<()> {
        let owner_id = require_owner(owner_id)?;
        self.sync.listen(&owner_id).await
    }

    /// Stop applying remote changes
    pub async fn stop_sync(&self) {
        self.sync.stop().await;
    }

    /// Push whatever is still pending for `owner_id`
    pub async fn resync(&self, owner_id: &str) -> Result<PushReport> {
        let owner_id = require_owner(owner_id)?;
        self.sync.push(&owner_id).await
    }

    pub fn observe_all(&self) -> NoteWatch {
        self.store.observe_all()
    }

    pub fn observe_owner(&self, owner_id: &str) -> NoteWatch {
        self.store.observe_owner(owner_id)
    }

    /// Notes of `owner_id`, or unclaimed notes when signed out
    pub async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Note>> {
        match normalize_owner(owner_id) {
            Some(owner_id) => self.store.list_for_owner(&owner_id).await,
            None => self.store.list_unowned().await,
        }
    }

    pub async fn get(&self, id: NoteId) -> Result<Option<Note>> {
        self.store.get(id).await
    }

    pub async fn summary(&self, owner_id: Option<&str>) -> Result<SyncSummary> {
        self.store.summary(normalize_owner(owner_id).as_deref()).await
    }

    /// Wait until every task queued before this call has run
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.tasks
            .send(SyncTask::Flush(done))
            .await
            .map_err(|_| Error::QueueClosed)?;
        wait.await.map_err(|_| Error::QueueClosed)
    }

    /// Drain the queue, stop the worker and the listener
    pub async fn shutdown(self) {
        let Self {
            sync,
            tasks,
            worker,
            ..
        } = self;

        drop(tasks);
        if let Err(error) = worker.await {
            tracing::warn!(%error, "Sync worker ended abnormally");
        }
        sync.stop().await;
    }
}

async fn run_worker(sync: Arc<SyncCoordinator>, mut queue: mpsc::Receiver<SyncTask>) {
    while let Some(task) = queue.recv().await {
        match task {
            SyncTask::Push(owner_id) => {
                if let Err(error) = sync.push(&owner_id).await {
                    tracing::warn!(%owner_id, %error, "Background push failed");
                }
            }
            SyncTask::DeleteRemote {
                owner_id,
                remote_id,
            } => sync.push_delete(&owner_id, &remote_id).await,
            SyncTask::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Sync worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ChangeKind, MemoryBackend, RemoteChange, RemoteDocument};
    use crate::util::unix_millis_now;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::time::Duration;

    struct Fixture {
        store: Arc<NoteStore>,
        remote: Arc<MemoryBackend>,
        repo: NoteRepository,
    }

    fn setup_with(settings: &SyncSettings) -> Fixture {
        let store = Arc::new(NoteStore::open_in_memory().unwrap());
        let remote = MemoryBackend::shared();
        let repo = NoteRepository::new(Arc::clone(&store), remote.clone(), settings).unwrap();
        Fixture {
            store,
            remote,
            repo,
        }
    }

    fn setup() -> Fixture {
        setup_with(&SyncSettings::default())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_insert_stays_pending_until_resync() {
        let fx = setup();
        fx.remote.set_offline(true);

        let note = fx.repo.insert("Buy milk", Some("u1")).await.unwrap();
        fx.repo.flush().await.unwrap();

        let stored = fx.repo.get(note.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "Buy milk");
        assert_eq!(stored.sync_state, SyncState::Pending);
        assert_eq!(stored.remote_id, None);

        fx.remote.set_offline(false);
        let report = fx.repo.resync("u1").await.unwrap();
        assert_eq!(report.created, 1);

        let synced = fx.repo.get(note.id).await.unwrap().unwrap();
        assert!(synced.is_synced());
        let remote_id = synced.remote_id.clone().unwrap();

        let stale = RemoteChange::new(
            ChangeKind::Modified,
            remote_id,
            RemoteDocument::new("Buy oat milk", synced.timestamp - 1),
        );
        fx.repo.coordinator().apply_changes("u1", &[stale]).await;
        assert_eq!(fx.repo.get(note.id).await.unwrap().unwrap().content, "Buy milk");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_with_listener_running_yields_one_row() {
        let fx = setup();
        fx.repo.start_sync("u1").await.unwrap();

        fx.repo.insert("Buy milk", Some("u1")).await.unwrap();
        fx.repo.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let notes = fx.repo.list(Some("u1")).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].is_synced());
        assert_eq!(fx.remote.documents("u1").len(), 1);

        fx.repo.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn claim_assigns_and_pushes_unowned_notes() {
        let fx = setup();
        for content in ["one", "two", "three"] {
            fx.repo.insert(content, None).await.unwrap();
        }
        fx.repo.flush().await.unwrap();
        assert_eq!(fx.remote.create_count(), 0);

        let outcome = fx.repo.claim("u1").await.unwrap();
        assert_eq!(outcome.claimed, 3);
        assert_eq!(outcome.push.created, 3);

        let notes = fx.repo.list(Some("u1")).await.unwrap();
        assert_eq!(notes.len(), 3);
        assert!(notes.iter().all(Note::is_synced));
        let remote_ids: HashSet<_> = notes
            .iter()
            .filter_map(|note| note.remote_id.clone())
            .collect();
        assert_eq!(remote_ids.len(), 3);
        assert!(fx.repo.list(None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_advances_timestamp_past_stored_value() {
        let fx = setup();
        let future = unix_millis_now() + 60_000;
        let note = fx
            .store
            .insert(&NewNote::new("draft", None).with_timestamp(future))
            .await
            .unwrap();

        let edited = fx
            .repo
            .update(
                &Note {
                    content: "final".to_string(),
                    ..note.clone()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(edited.timestamp, future + 1);
        assert_eq!(edited.content, "final");
        assert_eq!(fx.repo.get(note.id).await.unwrap().unwrap(), edited);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_synced_note_merges_remote_document() {
        let fx = setup();
        let note = fx.repo.insert("draft", Some("u1")).await.unwrap();
        fx.repo.flush().await.unwrap();
        let synced = fx.repo.get(note.id).await.unwrap().unwrap();

        let edited = fx
            .repo
            .update(
                &Note {
                    content: "final".to_string(),
                    ..synced.clone()
                },
                Some("u1"),
            )
            .await
            .unwrap();
        assert_eq!(edited.sync_state, SyncState::Pending);
        assert_eq!(edited.remote_id, synced.remote_id);
        fx.repo.flush().await.unwrap();

        let stored = fx.repo.get(note.id).await.unwrap().unwrap();
        assert!(stored.is_synced());
        assert_eq!(fx.remote.create_count(), 1);
        assert_eq!(fx.remote.merge_count(), 1);
        assert_eq!(
            fx.remote.documents("u1")[0].1,
            RemoteDocument::new("final", edited.timestamp)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_missing_note_fails() {
        let fx = setup();
        let note = fx.repo.insert("gone", None).await.unwrap();
        fx.store.delete(note.id).await.unwrap();

        let result = fx.repo.update(&note, None).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_synced_note_removes_remote_document() {
        let fx = setup();
        let note = fx.repo.insert("bye", Some("u1")).await.unwrap();
        fx.repo.flush().await.unwrap();
        assert_eq!(fx.remote.documents("u1").len(), 1);

        assert!(fx.repo.delete(&note).await.unwrap());
        fx.repo.flush().await.unwrap();

        assert!(fx.remote.documents("u1").is_empty());
        assert!(fx.repo.get(note.id).await.unwrap().is_none());
        assert!(!fx.repo.delete(&note).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_survives_remote_failure() {
        let fx = setup();
        let note = fx.repo.insert("bye", Some("u1")).await.unwrap();
        fx.repo.flush().await.unwrap();

        fx.remote.set_offline(true);
        assert!(fx.repo.delete(&note).await.unwrap());
        fx.repo.flush().await.unwrap();

        assert!(fx.repo.list(Some("u1")).await.unwrap().is_empty());
        assert_eq!(fx.remote.documents("u1").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unowned_notes_never_reach_the_remote() {
        let fx = setup();
        let note = fx.repo.insert("local only", Some("   ")).await.unwrap();
        assert_eq!(note.owner_id, None);
        fx.repo.delete(&note).await.unwrap();
        fx.repo.flush().await.unwrap();

        assert_eq!(fx.remote.create_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_queue_drops_extra_push_triggers() {
        let fx = setup_with(&SyncSettings {
            queue_capacity: 1,
            ..SyncSettings::default()
        });
        fx.remote.set_latency(Some(Duration::from_millis(10)));

        for i in 0..10 {
            fx.repo.insert(&format!("note {i}"), Some("u1")).await.unwrap();
        }
        fx.repo.flush().await.unwrap();
        fx.repo.resync("u1").await.unwrap();

        let summary = fx.repo.summary(Some("u1")).await.unwrap();
        assert_eq!(summary.synced, 10);
        assert_eq!(summary.pending, 0);
        assert_eq!(fx.remote.create_count(), 10);
        assert_eq!(fx.remote.max_concurrent_writes(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_drains_queued_work() {
        let fx = setup();
        fx.repo.start_sync("u1").await.unwrap();
        fx.repo.insert("last words", Some("u1")).await.unwrap();

        let coordinator = Arc::clone(fx.repo.coordinator());
        fx.repo.shutdown().await;

        assert_eq!(fx.remote.documents("u1").len(), 1);
        assert_eq!(coordinator.listening_owner().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn observe_owner_sees_background_sync() {
        let fx = setup();
        let mut watch = fx.repo.observe_owner("u1");
        assert!(watch.next().await.unwrap().unwrap().is_empty());

        fx.repo.insert("watched", Some("u1")).await.unwrap();
        let synced = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notes = watch.next().await.unwrap().unwrap();
                if notes.iter().any(Note::is_synced) {
                    return notes;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(synced.len(), 1);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let store = Arc::new(NoteStore::open_in_memory().unwrap());
        let result = NoteRepository::new(
            store,
            MemoryBackend::shared(),
            &SyncSettings {
                queue_capacity: 0,
                ..SyncSettings::default()
            },
        );
        assert!(result.is_err());
    }
}
