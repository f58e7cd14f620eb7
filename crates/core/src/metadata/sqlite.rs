//! SQLite-backed sync-metadata store.
//!
//! One row per path. The connection is opened in WAL mode with a busy
//! timeout, and the schema is managed through ordered migrations tracked in
//! the SQLite `user_version` pragma.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::errors::MetadataError;
use crate::identity::ContentIdentity;
use crate::models::{AcceptedIdentity, DiffType, EntrySyncMetadata, ResolutionAction};

use super::{SyncMetadataStore, UpdateFn};

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "initial schema",
    r#"
    CREATE TABLE IF NOT EXISTS entry_sync_metadata (
        path        TEXT PRIMARY KEY,
        synced      TEXT,
        accepted    TEXT,
        action      TEXT,
        diff        TEXT,
        updated_at  TEXT NOT NULL
    );
    "#,
)];

/// Metadata store over a SQLite database.
///
/// The inner connection is wrapped in a `Mutex` so the store is
/// `Send + Sync`, enabling use behind `Arc`.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) a database at `path` and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening metadata store");

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, MetadataError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("metadata store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn row_to_metadata(
        synced: Option<String>,
        accepted: Option<String>,
        action: Option<String>,
        diff: Option<String>,
        path: &str,
    ) -> Result<EntrySyncMetadata, MetadataError> {
        let action = action
            .map(|a| {
                serde_json::from_value::<ResolutionAction>(serde_json::Value::String(a.clone()))
                    .map_err(|e| MetadataError::CorruptRecord {
                        path: path.to_string(),
                        detail: format!("bad action '{a}': {e}"),
                    })
            })
            .transpose()?;
        let diff = diff
            .map(|d| {
                serde_json::from_value::<DiffType>(serde_json::Value::String(d.clone())).map_err(
                    |e| MetadataError::CorruptRecord {
                        path: path.to_string(),
                        detail: format!("bad diff type '{d}': {e}"),
                    },
                )
            })
            .transpose()?;
        Ok(EntrySyncMetadata {
            synced: synced.map(ContentIdentity::from_token),
            accepted: accepted.as_deref().map(AcceptedIdentity::from_token),
            action,
            diff,
        })
    }

    fn upsert(
        conn: &Connection,
        path: &str,
        meta: &EntrySyncMetadata,
    ) -> Result<(), MetadataError> {
        conn.execute(
            "INSERT INTO entry_sync_metadata (path, synced, accepted, action, diff, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(path) DO UPDATE SET
                 synced = excluded.synced,
                 accepted = excluded.accepted,
                 action = excluded.action,
                 diff = excluded.diff,
                 updated_at = excluded.updated_at",
            params![
                path,
                meta.synced.as_ref().map(|id| id.as_str().to_string()),
                meta.accepted.as_ref().map(AcceptedIdentity::to_token),
                meta.action.map(|a| a.to_string()),
                meta.diff.map(|d| d.to_string()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl SyncMetadataStore for SqliteMetadataStore {
    fn get_all(&self) -> Result<BTreeMap<String, EntrySyncMetadata>, MetadataError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT path, synced, accepted, action, diff FROM entry_sync_metadata",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (path, synced, accepted, action, diff) = row?;
            let meta = Self::row_to_metadata(synced, accepted, action, diff, &path)?;
            out.insert(path, meta);
        }
        Ok(out)
    }

    fn update_single(
        &self,
        path: &str,
        f: UpdateFn<'_>,
    ) -> Result<Option<EntrySyncMetadata>, MetadataError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let old = {
            let mut stmt = tx.prepare(
                "SELECT synced, accepted, action, diff FROM entry_sync_metadata WHERE path = ?1",
            )?;
            let mut rows = stmt.query(params![path])?;
            match rows.next()? {
                Some(row) => Some(Self::row_to_metadata(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    path,
                )?),
                None => None,
            }
        };

        let new = f(old);
        match &new {
            Some(meta) => Self::upsert(&tx, path, meta)?,
            None => {
                tx.execute(
                    "DELETE FROM entry_sync_metadata WHERE path = ?1",
                    params![path],
                )?;
            }
        }
        tx.commit()?;
        Ok(new)
    }

    fn set_multi(
        &self,
        entries: &BTreeMap<String, Option<EntrySyncMetadata>>,
    ) -> Result<(), MetadataError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (path, meta) in entries {
            match meta {
                Some(meta) => Self::upsert(&tx, path, meta)?,
                None => {
                    tx.execute(
                        "DELETE FROM entry_sync_metadata WHERE path = ?1",
                        params![path],
                    )?;
                }
            }
        }
        tx.commit()?;
        debug!(count = entries.len(), "metadata batch written");
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<EntrySyncMetadata>, MetadataError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT synced, accepted, action, diff FROM entry_sync_metadata WHERE path = ?1",
        )?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_metadata(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                path,
            )?)),
            None => Ok(None),
        }
    }
}

/// Run all pending migrations against `conn`.
fn run_migrations(conn: &Connection) -> Result<(), MetadataError> {
    let current_version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying metadata migration");
            conn.execute_batch(sql)
                .map_err(|e| MetadataError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            conn.pragma_update(None, "user_version", version)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        {
            let store = SqliteMetadataStore::open(&path).unwrap();
            store
                .update_single("/note.md", &mut |_| {
                    Some(EntrySyncMetadata::baseline(ContentIdentity::of_bytes(
                        b"hello",
                    )))
                })
                .unwrap();
        }

        // Reopen: the record survived the process "restart".
        let store = SqliteMetadataStore::open(&path).unwrap();
        let meta = store.get("/note.md").unwrap().unwrap();
        assert_eq!(meta.synced, Some(ContentIdentity::of_bytes(b"hello")));
    }

    #[test]
    fn test_all_columns_round_trip() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let full = EntrySyncMetadata {
            synced: Some(ContentIdentity::of_bytes(b"old")),
            accepted: Some(AcceptedIdentity::Content(ContentIdentity::of_bytes(b"new"))),
            action: Some(ResolutionAction::AcceptLocal),
            diff: Some(DiffType::ConflictingUpdate),
        };
        store
            .update_single("/x.md", &mut |_| Some(full.clone()))
            .unwrap();
        assert_eq!(store.get("/x.md").unwrap().unwrap(), full);

        let removal = EntrySyncMetadata {
            synced: Some(ContentIdentity::directory()),
            accepted: Some(AcceptedIdentity::Removal),
            action: Some(ResolutionAction::AcceptAuto),
            diff: Some(DiffType::LocalRemove),
        };
        store
            .update_single("/dir", &mut |_| Some(removal.clone()))
            .unwrap();
        assert_eq!(store.get("/dir").unwrap().unwrap(), removal);
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        assert!(store.get("/nope").unwrap().is_none());
        assert!(store.get_all().unwrap().is_empty());
    }
}
