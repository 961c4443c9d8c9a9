//! Remote backend stored in a shared `SQLite` file.
//!
//! Several local databases (one per device or CLI profile) can point at the
//! same file and see each other's writes. Every write appends to a `changes`
//! log; subscriptions deliver the current collection and then poll the log.
//!
//! Subscribers in other processes keep their own cursors into the log, so it
//! is never pruned and grows with every write.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::{
    ChangeFeed, ChangeKind, DocumentPatch, FeedItem, RemoteBackend, RemoteChange, RemoteDocument,
    RemoteError, RemoteResult,
};
use crate::config::SyncSettings;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        owner_id TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        fields TEXT NOT NULL,
        PRIMARY KEY (owner_id, doc_id)
    );
    CREATE TABLE IF NOT EXISTS changes (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        fields TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_changes_owner_seq ON changes(owner_id, seq);
";

fn backend_error(error: rusqlite::Error) -> RemoteError {
    match error.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
            RemoteError::Unavailable(error.to_string())
        }
        Some(rusqlite::ErrorCode::PermissionDenied | rusqlite::ErrorCode::ReadOnly) => {
            RemoteError::PermissionDenied(error.to_string())
        }
        _ => RemoteError::Backend(error.to_string()),
    }
}

fn encode_fields(fields: &Map<String, Value>) -> RemoteResult<String> {
    serde_json::to_string(fields).map_err(|error| RemoteError::Backend(error.to_string()))
}

fn decode_fields(raw: &str) -> RemoteResult<Map<String, Value>> {
    serde_json::from_str(raw).map_err(|error| RemoteError::Backend(error.to_string()))
}

/// Remote backend over a shared `SQLite` file.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
    feed_buffer: usize,
}

impl SqliteBackend {
    /// Open (or create) the shared collection file
    pub fn open(path: impl AsRef<Path>, settings: &SyncSettings) -> crate::Result<Self> {
        settings.validate()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        if let Err(error) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!(%error, "Failed to enable WAL on the shared collection");
        }
        Self::from_connection(conn, settings)
    }

    /// In-memory collection (primarily for tests)
    pub fn open_in_memory(settings: &SyncSettings) -> crate::Result<Self> {
        settings.validate()?;
        Self::from_connection(Connection::open_in_memory()?, settings)
    }

    fn from_connection(conn: Connection, settings: &SyncSettings) -> crate::Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval: settings.poll_interval(),
            feed_buffer: settings.feed_buffer,
        })
    }

    /// Typed documents of one owner, ordered by id
    pub async fn documents(&self, owner_id: &str) -> RemoteResult<Vec<(String, RemoteDocument)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT doc_id, fields FROM documents WHERE owner_id = ? ORDER BY doc_id")
            .map_err(backend_error)?;
        let rows = stmt
            .query_map(params![owner_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(backend_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend_error)?;

        rows.into_iter()
            .map(|(id, raw)| Ok((id, RemoteDocument::from_fields(&decode_fields(&raw)?))))
            .collect()
    }

    fn append_change(
        conn: &Connection,
        owner_id: &str,
        doc_id: &str,
        kind: ChangeKind,
        fields: &str,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO changes (owner_id, doc_id, kind, fields) VALUES (?, ?, ?, ?)",
            params![owner_id, doc_id, kind.as_str(), fields],
        )?;
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for SqliteBackend {
    async fn create(&self, owner_id: &str, doc: &RemoteDocument) -> RemoteResult<String> {
        let doc_id = Uuid::now_v7().simple().to_string();
        let fields = encode_fields(&doc.to_fields())?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(backend_error)?;
        tx.execute(
            "INSERT INTO documents (owner_id, doc_id, fields) VALUES (?, ?, ?)",
            params![owner_id, doc_id, fields],
        )
        .map_err(backend_error)?;
        Self::append_change(&tx, owner_id, &doc_id, ChangeKind::Added, &fields)
            .map_err(backend_error)?;
        tx.commit().map_err(backend_error)?;

        Ok(doc_id)
    }

    async fn merge_update(
        &self,
        owner_id: &str,
        doc_id: &str,
        patch: &DocumentPatch,
    ) -> RemoteResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(backend_error)?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT fields FROM documents WHERE owner_id = ? AND doc_id = ?",
                params![owner_id, doc_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_error)?;
        let Some(raw) = raw else {
            return Err(RemoteError::NotFound(doc_id.to_string()));
        };

        let mut fields = decode_fields(&raw)?;
        patch.apply_to(&mut fields);
        let merged = encode_fields(&fields)?;

        tx.execute(
            "UPDATE documents SET fields = ? WHERE owner_id = ? AND doc_id = ?",
            params![merged, owner_id, doc_id],
        )
        .map_err(backend_error)?;
        Self::append_change(&tx, owner_id, doc_id, ChangeKind::Modified, &merged)
            .map_err(backend_error)?;
        tx.commit().map_err(backend_error)?;
        Ok(())
    }

    async fn delete(&self, owner_id: &str, doc_id: &str) -> RemoteResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(backend_error)?;

        let raw: Option<String> = tx
            .query_row(
                "DELETE FROM documents WHERE owner_id = ? AND doc_id = ? RETURNING fields",
                params![owner_id, doc_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_error)?;
        if let Some(raw) = raw {
            Self::append_change(&tx, owner_id, doc_id, ChangeKind::Removed, &raw)
                .map_err(backend_error)?;
        }
        tx.commit().map_err(backend_error)?;
        Ok(())
    }

    async fn subscribe(&self, owner_id: &str) -> RemoteResult<ChangeFeed> {
        // Snapshot and cursor are read in one transaction so no change falls between them.
        let (snapshot, cursor) = {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction().map_err(backend_error)?;
            let cursor: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) FROM changes WHERE owner_id = ?",
                    params![owner_id],
                    |row| row.get(0),
                )
                .map_err(backend_error)?;
            let rows = {
                let mut stmt = tx
                    .prepare(
                        "SELECT doc_id, fields FROM documents WHERE owner_id = ? ORDER BY doc_id",
                    )
                    .map_err(backend_error)?;
                let rows = stmt
                    .query_map(params![owner_id], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })
                    .map_err(backend_error)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(backend_error)?;
                rows
            };
            tx.commit().map_err(backend_error)?;

            let snapshot = rows
                .into_iter()
                .map(|(doc_id, raw)| {
                    Ok(RemoteChange::new(
                        ChangeKind::Added,
                        doc_id,
                        RemoteDocument::from_fields(&decode_fields(&raw)?),
                    ))
                })
                .collect::<RemoteResult<Vec<_>>>()?;
            (snapshot, cursor)
        };

        let (tx, feed) = ChangeFeed::channel(self.feed_buffer);
        tokio::spawn(poll_changes(
            Arc::clone(&self.conn),
            owner_id.to_string(),
            cursor,
            snapshot,
            self.poll_interval,
            tx,
        ));
        Ok(feed)
    }
}

async fn poll_changes(
    conn: Arc<Mutex<Connection>>,
    owner_id: String,
    mut cursor: i64,
    snapshot: Vec<RemoteChange>,
    poll_interval: Duration,
    tx: mpsc::Sender<FeedItem>,
) {
    if tx.send(Ok(snapshot)).await.is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = tx.closed() => {
                tracing::debug!(%owner_id, "Change feed dropped; stopping poller");
                return;
            }
        }

        let item = match read_changes_after(&conn, &owner_id, cursor).await {
            Ok((changes, last_seq)) if changes.is_empty() => {
                cursor = last_seq;
                continue;
            }
            Ok((changes, last_seq)) => {
                cursor = last_seq;
                Ok(changes)
            }
            Err(error) => Err(error),
        };

        if tx.send(item).await.is_err() {
            return;
        }
    }
}

async fn read_changes_after(
    conn: &Mutex<Connection>,
    owner_id: &str,
    cursor: i64,
) -> RemoteResult<(Vec<RemoteChange>, i64)> {
    let rows = {
        let conn = conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT seq, doc_id, kind, fields FROM changes
                 WHERE owner_id = ? AND seq > ? ORDER BY seq",
            )
            .map_err(backend_error)?;
        let rows = stmt
            .query_map(params![owner_id, cursor], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(backend_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend_error)?;
        rows
    };

    let mut last_seq = cursor;
    let mut changes = Vec::with_capacity(rows.len());
    for (seq, doc_id, kind, raw) in rows {
        last_seq = seq;
        let Some(kind) = ChangeKind::parse(&kind) else {
            tracing::warn!(seq, %kind, "Skipping change with unknown kind");
            continue;
        };
        let snapshot = RemoteDocument::from_fields(&decode_fields(&raw)?);
        changes.push(RemoteChange::new(kind, doc_id, snapshot));
    }
    Ok((changes, last_seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn fast_settings() -> SyncSettings {
        SyncSettings {
            poll_interval_ms: 10,
            ..SyncSettings::default()
        }
    }

    async fn next_batch(feed: &mut ChangeFeed) -> Vec<RemoteChange> {
        tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .expect("feed timed out")
            .expect("feed closed")
            .expect("feed error")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_update_preserves_remote_only_fields() {
        let backend = SqliteBackend::open_in_memory(&fast_settings()).unwrap();
        let id = backend
            .create("u1", &RemoteDocument::new("draft", 1))
            .await
            .unwrap();

        {
            let conn = backend.conn.lock().await;
            conn.execute(
                "UPDATE documents SET fields = json_set(fields, '$.pinned', json('true'))
                 WHERE doc_id = ?",
                params![id],
            )
            .unwrap();
        }

        backend
            .merge_update(
                "u1",
                &id,
                &DocumentPatch::from_document(&RemoteDocument::new("final", 2)),
            )
            .await
            .unwrap();

        let conn = backend.conn.lock().await;
        let raw: String = conn
            .query_row("SELECT fields FROM documents WHERE doc_id = ?", params![id], |row| {
                row.get(0)
            })
            .unwrap();
        let fields = decode_fields(&raw).unwrap();
        assert_eq!(fields.get("pinned"), Some(&Value::Bool(true)));
        assert_eq!(RemoteDocument::from_fields(&fields), RemoteDocument::new("final", 2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_update_on_missing_document_is_not_found() {
        let backend = SqliteBackend::open_in_memory(&fast_settings()).unwrap();
        let result = backend
            .merge_update("u1", "missing", &DocumentPatch::default())
            .await;
        assert_eq!(result, Err(RemoteError::NotFound("missing".to_string())));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_handles_on_one_file_see_each_others_changes() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("remote.db");
        let device_a = SqliteBackend::open(&path, &fast_settings()).unwrap();
        let device_b = SqliteBackend::open(&path, &fast_settings()).unwrap();

        let existing = device_a
            .create("u1", &RemoteDocument::new("before subscribe", 1))
            .await
            .unwrap();

        let mut feed = device_b.subscribe("u1").await.unwrap();
        let snapshot = next_batch(&mut feed).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].doc_id, existing);

        let created = device_a
            .create("u1", &RemoteDocument::new("after subscribe", 2))
            .await
            .unwrap();
        device_a.create("u2", &RemoteDocument::new("someone else", 3)).await.unwrap();
        device_a.delete("u1", &existing).await.unwrap();

        let mut seen = Vec::new();
        while seen.len() < 2 {
            seen.extend(next_batch(&mut feed).await);
        }
        assert_eq!(
            seen,
            vec![
                RemoteChange::new(
                    ChangeKind::Added,
                    created,
                    RemoteDocument::new("after subscribe", 2),
                ),
                RemoteChange::new(
                    ChangeKind::Removed,
                    existing,
                    RemoteDocument::new("before subscribe", 1),
                ),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn documents_lists_owner_collection() {
        let backend = SqliteBackend::open_in_memory(&fast_settings()).unwrap();
        backend.create("u1", &RemoteDocument::new("a", 1)).await.unwrap();
        backend.create("u2", &RemoteDocument::new("b", 2)).await.unwrap();

        let docs = backend.documents("u1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].1, RemoteDocument::new("a", 1));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = SyncSettings {
            feed_buffer: 0,
            ..SyncSettings::default()
        };
        assert!(SqliteBackend::open_in_memory(&settings).is_err());
    }
}
