//! In-process remote backend.
//!
//! Writes fan out to subscribers through a broadcast channel; each
//! subscription runs a small task that filters by owner and forwards into its
//! [`ChangeFeed`]. Failure injection and latency knobs exist for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    ChangeFeed, ChangeKind, DocumentPatch, RemoteBackend, RemoteChange, RemoteDocument,
    RemoteError, RemoteResult,
};

const BROADCAST_CAPACITY: usize = 1024;
const DEFAULT_FEED_BUFFER: usize = 32;

type Collection = BTreeMap<String, Map<String, Value>>;

#[derive(Debug, Clone)]
enum Broadcast {
    Changes {
        owner_id: String,
        changes: Vec<RemoteChange>,
    },
    ListenError {
        owner_id: String,
        error: RemoteError,
    },
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    offline: bool,
    failing_creates: usize,
    latency: Option<Duration>,
}

/// Remote backend held entirely in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    events: broadcast::Sender<Broadcast>,
    feed_buffer: usize,
    creates: AtomicUsize,
    merges: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
            feed_buffer: DEFAULT_FEED_BUFFER,
            creates: AtomicUsize::new(0),
            merges: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Shared handle, the form the coordinator consumes
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every operation fail with [`RemoteError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make the next `count` creates fail
    pub fn fail_next_creates(&self, count: usize) {
        self.state().failing_creates = count;
    }

    /// Delay every write by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Number of successful creates so far
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of successful merge updates so far
    pub fn merge_count(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    /// Highest number of writes that were in flight at the same time
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Typed documents of one owner, ordered by id
    pub fn documents(&self, owner_id: &str) -> Vec<(String, RemoteDocument)> {
        self.state()
            .collections
            .get(owner_id)
            .map(|collection| {
                collection
                    .iter()
                    .map(|(id, fields)| (id.clone(), RemoteDocument::from_fields(fields)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw fields of one document
    pub fn raw_document(&self, owner_id: &str, doc_id: &str) -> Option<Map<String, Value>> {
        self.state()
            .collections
            .get(owner_id)
            .and_then(|collection| collection.get(doc_id))
            .cloned()
    }

    /// Store a raw document as another client would, notifying subscribers
    pub fn put_raw(&self, owner_id: &str, doc_id: &str, fields: Map<String, Value>) {
        let mut state = self.state();
        let collection = state.collections.entry(owner_id.to_string()).or_default();
        let kind = if collection.contains_key(doc_id) {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        let snapshot = RemoteDocument::from_fields(&fields);
        collection.insert(doc_id.to_string(), fields);
        self.publish(owner_id, RemoteChange::new(kind, doc_id, snapshot));
    }

    /// Broadcast a listen error to every subscriber of `owner_id`
    pub fn inject_listen_error(&self, owner_id: &str, error: &RemoteError) {
        tracing::debug!(owner_id, %error, "Injecting listen error");
        let _ = self.events.send(Broadcast::ListenError {
            owner_id: owner_id.to_string(),
            error: error.clone(),
        });
    }

    // Must be called with the state lock held so delivery order matches write order.
    fn publish(&self, owner_id: &str, change: RemoteChange) {
        let _ = self.events.send(Broadcast::Changes {
            owner_id: owner_id.to_string(),
            changes: vec![change],
        });
    }

    fn check_online(&self) -> RemoteResult<Option<Duration>> {
        let state = self.state();
        if state.offline {
            return Err(RemoteError::Unavailable("memory backend is offline".into()));
        }
        Ok(state.latency)
    }

    async fn begin_write(&self) -> RemoteResult<WriteGuard<'_>> {
        let latency = self.check_online()?;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = WriteGuard { backend: self };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(guard)
    }
}

struct WriteGuard<'a> {
    backend: &'a MemoryBackend,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.backend.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn create(&self, owner_id: &str, doc: &RemoteDocument) -> RemoteResult<String> {
        let _write = self.begin_write().await?;

        let mut state = self.state();
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(RemoteError::Unavailable("injected create failure".into()));
        }

        let doc_id = Uuid::now_v7().simple().to_string();
        state
            .collections
            .entry(owner_id.to_string())
            .or_default()
            .insert(doc_id.clone(), doc.to_fields());
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.publish(
            owner_id,
            RemoteChange::new(ChangeKind::Added, doc_id.clone(), doc.clone()),
        );
        Ok(doc_id)
    }

    async fn merge_update(
        &self,
        owner_id: &str,
        doc_id: &str,
        patch: &DocumentPatch,
    ) -> RemoteResult<()> {
        let _write = self.begin_write().await?;

        let mut state = self.state();
        let fields = state
            .collections
            .get_mut(owner_id)
            .and_then(|collection| collection.get_mut(doc_id))
            .ok_or_else(|| RemoteError::NotFound(doc_id.to_string()))?;
        patch.apply_to(fields);
        let snapshot = RemoteDocument::from_fields(fields);
        self.merges.fetch_add(1, Ordering::SeqCst);
        self.publish(
            owner_id,
            RemoteChange::new(ChangeKind::Modified, doc_id, snapshot),
        );
        Ok(())
    }

    async fn delete(&self, owner_id: &str, doc_id: &str) -> RemoteResult<()> {
        let _write = self.begin_write().await?;

        let mut state = self.state();
        let removed = state
            .collections
            .get_mut(owner_id)
            .and_then(|collection| collection.remove(doc_id));
        if let Some(fields) = removed {
            self.publish(
                owner_id,
                RemoteChange::new(
                    ChangeKind::Removed,
                    doc_id,
                    RemoteDocument::from_fields(&fields),
                ),
            );
        }
        Ok(())
    }

    async fn subscribe(&self, owner_id: &str) -> RemoteResult<ChangeFeed> {
        self.check_online()?;

        // Snapshot and receiver are taken under one lock so no write falls between them.
        let (snapshot, events) = {
            let state = self.state();
            let snapshot = state
                .collections
                .get(owner_id)
                .map(|collection| {
                    collection
                        .iter()
                        .map(|(id, fields)| {
                            RemoteChange::new(
                                ChangeKind::Added,
                                id.clone(),
                                RemoteDocument::from_fields(fields),
                            )
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            (snapshot, self.events.subscribe())
        };

        let (tx, feed) = ChangeFeed::channel(self.feed_buffer);
        tokio::spawn(forward(owner_id.to_string(), snapshot, events, tx));
        Ok(feed)
    }
}

async fn forward(
    owner_id: String,
    snapshot: Vec<RemoteChange>,
    mut events: broadcast::Receiver<Broadcast>,
    tx: tokio::sync::mpsc::Sender<super::FeedItem>,
) {
    if tx.send(Ok(snapshot)).await.is_err() {
        return;
    }

    loop {
        let item = match events.recv().await {
            Ok(Broadcast::Changes {
                owner_id: target,
                changes,
            }) if target == owner_id => Ok(changes),
            Ok(Broadcast::ListenError {
                owner_id: target,
                error,
            }) if target == owner_id => Err(error),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(RemoteError::Unavailable(
                format!("change feed lagged by {skipped} events"),
            )),
            Err(broadcast::error::RecvError::Closed) => return,
        };

        if tx.send(item).await.is_err() {
            tracing::debug!(%owner_id, "Change feed dropped; ending subscription");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn create_update_delete_roundtrip() {
        let backend = MemoryBackend::new();
        let id = backend
            .create("u1", &RemoteDocument::new("hello", 1))
            .await
            .unwrap();

        backend
            .merge_update("u1", &id, &DocumentPatch::from_document(&RemoteDocument::new("bye", 2)))
            .await
            .unwrap();
        assert_eq!(
            backend.documents("u1"),
            vec![(id.clone(), RemoteDocument::new("bye", 2))]
        );

        backend.delete("u1", &id).await.unwrap();
        assert!(backend.documents("u1").is_empty());
        backend.delete("u1", &id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_into_missing_document_is_not_found() {
        let backend = MemoryBackend::new();
        let result = backend
            .merge_update("u1", "nope", &DocumentPatch::default())
            .await;
        assert_eq!(result, Err(RemoteError::NotFound("nope".to_string())));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collections_are_scoped_per_owner() {
        let backend = MemoryBackend::new();
        let id = backend
            .create("u1", &RemoteDocument::new("mine", 1))
            .await
            .unwrap();

        assert!(backend.documents("u2").is_empty());
        assert!(backend.merge_update("u2", &id, &DocumentPatch::default()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_and_injected_failures() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        assert!(backend.create("u1", &RemoteDocument::new("x", 1)).await.is_err());
        assert!(backend.subscribe("u1").await.is_err());

        backend.set_offline(false);
        backend.fail_next_creates(1);
        assert!(backend.create("u1", &RemoteDocument::new("x", 1)).await.is_err());
        assert!(backend.create("u1", &RemoteDocument::new("x", 1)).await.is_ok());
        assert_eq!(backend.create_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribe_delivers_snapshot_then_changes() {
        let backend = MemoryBackend::new();
        let first = backend
            .create("u1", &RemoteDocument::new("existing", 1))
            .await
            .unwrap();

        let mut feed = backend.subscribe("u1").await.unwrap();
        let snapshot = feed.next().await.unwrap().unwrap();
        assert_eq!(
            snapshot,
            vec![RemoteChange::new(
                ChangeKind::Added,
                first.clone(),
                RemoteDocument::new("existing", 1)
            )]
        );

        backend.create("u2", &RemoteDocument::new("other owner", 1)).await.unwrap();
        backend.delete("u1", &first).await.unwrap();

        let removed = feed.next().await.unwrap().unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].kind, ChangeKind::Removed);
        assert_eq!(removed[0].doc_id, first);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_listen_error_reaches_only_that_owner() {
        let backend = MemoryBackend::new();
        let mut feed = backend.subscribe("u1").await.unwrap();
        assert!(feed.next().await.unwrap().unwrap().is_empty());

        backend.inject_listen_error("u2", &RemoteError::PermissionDenied("x".into()));
        backend.inject_listen_error("u1", &RemoteError::PermissionDenied("revoked".into()));

        let item = feed.next().await.unwrap();
        assert_eq!(item, Err(RemoteError::PermissionDenied("revoked".into())));
    }
}
