//! Local note store
//!
//! All access goes through one connection guarded by an async mutex, so single
//! statements never interleave. Every committed write bumps a version counter
//! that wakes live queries ([`NoteWatch`]).

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, params_from_iter, OptionalExtension, Row, ToSql};
use tokio::sync::{watch, Mutex};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{NewNote, Note, NoteId, SyncState, SyncSummary};

const NOTE_COLUMNS: &str = "id, remote_id, owner_id, content, timestamp, is_synced";

/// Durable, queryable table of notes shared by the repository and sync coordinator
pub struct NoteStore {
    db: Mutex<Database>,
    version: watch::Sender<u64>,
}

impl NoteStore {
    /// Wrap an already opened database
    pub fn new(db: Database) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            db: Mutex::new(db),
            version,
        }
    }

    /// Open a file-backed store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn notify(&self) {
        self.version.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn parse_note(row: &Row<'_>) -> rusqlite::Result<Note> {
        Ok(Note {
            id: NoteId::new(row.get(0)?),
            remote_id: row.get(1)?,
            owner_id: row.get(2)?,
            content: row.get(3)?,
            timestamp: row.get(4)?,
            sync_state: SyncState::from_flag(row.get::<_, i64>(5)? != 0),
        })
    }

    async fn query_notes(
        &self,
        filter: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        let mut stmt = db.connection().prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes {filter} ORDER BY timestamp DESC, id DESC"
        ))?;
        let notes = stmt
            .query_map(params_from_iter(params.iter()), Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    async fn query_note(
        &self,
        filter: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        let note = db
            .connection()
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes {filter} LIMIT 1"),
                params_from_iter(params.iter()),
                Self::parse_note,
            )
            .optional()?;
        Ok(note)
    }

    /// Live query over every note
    pub fn observe_all(self: &Arc<Self>) -> NoteWatch {
        NoteWatch::new(Arc::clone(self), None)
    }

    /// Live query over the notes of one owner
    pub fn observe_owner(self: &Arc<Self>, owner_id: impl Into<String>) -> NoteWatch {
        NoteWatch::new(Arc::clone(self), Some(owner_id.into()))
    }

    /// Insert a new pending note and return it with its assigned id
    pub async fn insert(&self, note: &NewNote) -> Result<Note> {
        let id = {
            let db = self.db.lock().await;
            db.connection().execute(
                "INSERT INTO notes (owner_id, content, timestamp, is_synced) VALUES (?, ?, ?, 0)",
                params![note.owner_id, note.content, note.timestamp],
            )?;
            db.connection().last_insert_rowid()
        };
        self.notify();

        Ok(Note {
            id: NoteId::new(id),
            remote_id: None,
            owner_id: note.owner_id.clone(),
            content: note.content.clone(),
            timestamp: note.timestamp,
            sync_state: SyncState::Pending,
        })
    }

    /// Insert a note received from the remote side, already marked synced
    pub async fn insert_synced(
        &self,
        owner_id: &str,
        remote_id: &str,
        content: &str,
        timestamp: i64,
    ) -> Result<Note> {
        let id = {
            let db = self.db.lock().await;
            db.connection().execute(
                "INSERT INTO notes (owner_id, remote_id, content, timestamp, is_synced)
                 VALUES (?, ?, ?, ?, 1)",
                params![owner_id, remote_id, content, timestamp],
            )?;
            db.connection().last_insert_rowid()
        };
        self.notify();

        Ok(Note {
            id: NoteId::new(id),
            remote_id: Some(remote_id.to_string()),
            owner_id: Some(owner_id.to_string()),
            content: content.to_string(),
            timestamp,
            sync_state: SyncState::Synced,
        })
    }

    /// Overwrite a note's owner, content, timestamp and sync state.
    ///
    /// The stored `remote_id` is never cleared by an update.
    pub async fn update(&self, note: &Note) -> Result<()> {
        let rows = {
            let db = self.db.lock().await;
            db.connection().execute(
                "UPDATE notes
                 SET owner_id = ?, content = ?, timestamp = ?, is_synced = ?,
                     remote_id = COALESCE(?, remote_id)
                 WHERE id = ?",
                params![
                    note.owner_id,
                    note.content,
                    note.timestamp,
                    i64::from(note.sync_state.is_synced()),
                    note.remote_id,
                    note.id.get()
                ],
            )?
        };

        if rows == 0 {
            return Err(Error::NotFound(note.id.get()));
        }
        self.notify();
        Ok(())
    }

    /// Delete a note by id; returns whether a row was removed
    pub async fn delete(&self, id: NoteId) -> Result<bool> {
        let rows = {
            let db = self.db.lock().await;
            db.connection()
                .execute("DELETE FROM notes WHERE id = ?", params![id.get()])?
        };
        if rows > 0 {
            self.notify();
        }
        Ok(rows > 0)
    }

    /// Get a note by id
    pub async fn get(&self, id: NoteId) -> Result<Option<Note>> {
        self.query_note("WHERE id = ?", &[&id.get()]).await
    }

    /// Every note, newest first
    pub async fn list_all(&self) -> Result<Vec<Note>> {
        self.query_notes("", &[]).await
    }

    /// Notes of one owner, newest first
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Note>> {
        self.query_notes("WHERE owner_id = ?", &[&owner_id]).await
    }

    /// Notes nobody has claimed yet, newest first
    pub async fn list_unowned(&self) -> Result<Vec<Note>> {
        self.query_notes("WHERE owner_id IS NULL", &[]).await
    }

    /// Every pending note regardless of owner
    pub async fn list_pending(&self) -> Result<Vec<Note>> {
        self.query_notes("WHERE is_synced = 0", &[]).await
    }

    /// Pending notes of one owner: the push working set
    pub async fn list_pending_for_owner(&self, owner_id: &str) -> Result<Vec<Note>> {
        self.query_notes("WHERE is_synced = 0 AND owner_id = ?", &[&owner_id])
            .await
    }

    /// Find the note correlated with a remote document
    pub async fn find_by_remote_id(&self, owner_id: &str, remote_id: &str) -> Result<Option<Note>> {
        self.query_note(
            "WHERE owner_id = ? AND remote_id = ?",
            &[&owner_id, &remote_id],
        )
        .await
    }

    /// Find an uncorrelated note with exactly this owner, content and timestamp
    pub async fn find_duplicate(
        &self,
        owner_id: &str,
        content: &str,
        timestamp: i64,
    ) -> Result<Option<Note>> {
        self.query_note(
            "WHERE owner_id = ? AND content = ? AND timestamp = ? AND remote_id IS NULL",
            &[&owner_id, &content, &timestamp],
        )
        .await
    }

    /// Assign every unowned note to `owner_id` and reset it to pending
    pub async fn claim_unowned(&self, owner_id: &str) -> Result<usize> {
        let rows = {
            let db = self.db.lock().await;
            db.connection().execute(
                "UPDATE notes SET owner_id = ?, is_synced = 0 WHERE owner_id IS NULL",
                params![owner_id],
            )?
        };
        if rows > 0 {
            self.notify();
        }
        Ok(rows)
    }

    /// Attach `remote_id` and mark the note synced in one statement
    pub async fn mark_synced(&self, id: NoteId, remote_id: &str) -> Result<()> {
        let rows = {
            let db = self.db.lock().await;
            db.connection().execute(
                "UPDATE notes SET remote_id = ?, is_synced = 1 WHERE id = ?",
                params![remote_id, id.get()],
            )?
        };
        if rows == 0 {
            return Err(Error::NotFound(id.get()));
        }
        self.notify();
        Ok(())
    }

    /// Record the outcome of pushing `content`/`timestamp` for a note.
    ///
    /// The `remote_id` is always attached. The note only flips to synced if it
    /// still holds what was pushed; an edit that landed while the remote write
    /// was in flight stays pending. A listener may already have imported the
    /// new document as a separate row; that row is dropped in the same
    /// transaction so the note keeps the correlation. Returns the resulting state.
    pub async fn mark_pushed(
        &self,
        id: NoteId,
        remote_id: &str,
        content: &str,
        timestamp: i64,
    ) -> Result<SyncState> {
        let (synced, replaced) = {
            let db = self.db.lock().await;
            let tx = db.connection().unchecked_transaction()?;
            let replaced = tx.execute(
                "DELETE FROM notes
                 WHERE remote_id = ?1 AND id != ?2
                   AND owner_id IS (SELECT owner_id FROM notes WHERE id = ?2)",
                params![remote_id, id.get()],
            )?;
            let rows = tx.execute(
                "UPDATE notes
                 SET remote_id = ?1,
                     is_synced = CASE WHEN content = ?2 AND timestamp = ?3 THEN 1 ELSE 0 END
                 WHERE id = ?4",
                params![remote_id, content, timestamp, id.get()],
            )?;
            if rows == 0 {
                return Err(Error::NotFound(id.get()));
            }
            let synced = tx.query_row(
                "SELECT is_synced FROM notes WHERE id = ?",
                params![id.get()],
                |row| row.get::<_, i64>(0),
            )? != 0;
            tx.commit()?;
            (synced, replaced)
        };
        if replaced > 0 {
            tracing::debug!(note_id = %id, remote_id, "Dropped imported copy of pushed note");
        }
        self.notify();
        Ok(SyncState::from_flag(synced))
    }

    /// Apply a remote snapshot if it is strictly newer than the local note.
    ///
    /// Returns whether the note was overwritten. Ties keep the local value.
    pub async fn apply_remote(&self, id: NoteId, content: &str, timestamp: i64) -> Result<bool> {
        let rows = {
            let db = self.db.lock().await;
            db.connection().execute(
                "UPDATE notes SET content = ?, timestamp = ?, is_synced = 1
                 WHERE id = ? AND timestamp < ? AND remote_id IS NOT NULL",
                params![content, timestamp, id.get(), timestamp],
            )?
        };
        if rows > 0 {
            self.notify();
        }
        Ok(rows > 0)
    }

    /// Delete the note correlated with a remote document, if any
    pub async fn delete_by_remote_id(&self, owner_id: &str, remote_id: &str) -> Result<bool> {
        let rows = {
            let db = self.db.lock().await;
            db.connection().execute(
                "DELETE FROM notes WHERE owner_id = ? AND remote_id = ?",
                params![owner_id, remote_id],
            )?
        };
        if rows > 0 {
            self.notify();
        }
        Ok(rows > 0)
    }

    /// Count notes by sync state for `owner_id` (or unowned notes when `None`)
    pub async fn summary(&self, owner_id: Option<&str>) -> Result<SyncSummary> {
        let db = self.db.lock().await;
        let (total, pending, synced): (i64, i64, i64) = db.connection().query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN is_synced = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_synced = 1 THEN 1 ELSE 0 END), 0)
             FROM notes WHERE owner_id IS ?",
            params![owner_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let unowned: i64 = db.connection().query_row(
            "SELECT COUNT(*) FROM notes WHERE owner_id IS NULL",
            [],
            |row| row.get(0),
        )?;

        let to_usize = |value: i64| usize::try_from(value).unwrap_or_default();
        Ok(SyncSummary {
            total: to_usize(total),
            pending: to_usize(pending),
            synced: to_usize(synced),
            unowned: to_usize(unowned),
        })
    }
}

/// Live query handle.
///
/// The first [`NoteWatch::next`] resolves immediately with the current result
/// set; later calls wait for the next committed write. Writes that land while
/// the caller is busy are coalesced into one refresh.
pub struct NoteWatch {
    store: Arc<NoteStore>,
    owner_id: Option<String>,
    changes: watch::Receiver<u64>,
    primed: bool,
}

impl NoteWatch {
    fn new(store: Arc<NoteStore>, owner_id: Option<String>) -> Self {
        let changes = store.version.subscribe();
        Self {
            store,
            owner_id,
            changes,
            primed: false,
        }
    }

    /// Owner this watch is scoped to, if any
    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// Wait for the next result set
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn next(&mut self) -> Option<Result<Vec<Note>>> {
        if self.primed {
            self.changes.changed().await.ok()?;
        } else {
            self.primed = true;
        }

        let notes = match self.owner_id.as_deref() {
            Some(owner_id) => self.store.list_for_owner(owner_id).await,
            None => self.store.list_all().await,
        };
        Some(notes)
    }
}
