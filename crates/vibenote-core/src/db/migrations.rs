//! Database migrations

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    if version < CURRENT_VERSION {
        tracing::info!("Migrated database from version {version} to {CURRENT_VERSION}");
    }
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

/// Migration to version 1: local-only notes
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notes_timestamp ON notes(timestamp DESC);",
    )?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?)", params![1])?;
    tx.commit()?;
    Ok(())
}

/// Migration to version 2: remote correlation, ownership, and sync state
///
/// `SQLite` cannot add a table-level CHECK to an existing table, so the
/// synced-implies-correlated rule is enforced with triggers.
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "ALTER TABLE notes ADD COLUMN remote_id TEXT;
        ALTER TABLE notes ADD COLUMN owner_id TEXT;
        ALTER TABLE notes ADD COLUMN is_synced INTEGER NOT NULL DEFAULT 0;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_notes_owner_remote
            ON notes(owner_id, remote_id) WHERE remote_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_notes_pending ON notes(is_synced, owner_id);
        CREATE TRIGGER IF NOT EXISTS notes_synced_requires_remote_insert
        BEFORE INSERT ON notes
        WHEN NEW.is_synced != 0 AND NEW.remote_id IS NULL
        BEGIN
            SELECT RAISE(ABORT, 'synced note must carry a remote_id');
        END;
        CREATE TRIGGER IF NOT EXISTS notes_synced_requires_remote_update
        BEFORE UPDATE ON notes
        WHEN NEW.is_synced != 0 AND NEW.remote_id IS NULL
        BEGIN
            SELECT RAISE(ABORT, 'synced note must carry a remote_id');
        END;",
    )?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?)", params![2])?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn v1_rows_survive_upgrade_as_unowned_pending() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_v1(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO notes (content, timestamp) VALUES ('legacy', 10)",
            [],
        )
        .unwrap();

        run(&mut conn).unwrap();

        let (owner, remote, synced): (Option<String>, Option<String>, i64) = conn
            .query_row(
                "SELECT owner_id, remote_id, is_synced FROM notes WHERE content = 'legacy'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(owner, None);
        assert_eq!(remote, None);
        assert_eq!(synced, 0);
    }

    #[test]
    fn synced_without_remote_id_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();

        let result = conn.execute(
            "INSERT INTO notes (content, timestamp, is_synced) VALUES ('x', 1, 1)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_owner_remote_pair_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();

        let insert = "INSERT INTO notes (content, timestamp, owner_id, remote_id, is_synced)
                      VALUES ('x', 1, 'u1', 'doc-1', 1)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());

        // Same remote id under another owner is a different document
        conn.execute(
            "INSERT INTO notes (content, timestamp, owner_id, remote_id, is_synced)
             VALUES ('x', 1, 'u2', 'doc-1', 1)",
            [],
        )
        .unwrap();
    }
}
