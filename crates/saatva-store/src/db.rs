//! SQLite-backed durable storage.
//!
//! [`SqliteBackend`] wraps a `rusqlite::Connection` behind an
//! `Arc<Mutex<>>`. Several processes may open the same file; WAL mode and
//! a busy timeout let them interleave, and every mutation runs in an
//! `IMMEDIATE` transaction so the revision counter never races.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{Change, StorageBackend};
use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Thread-safe handle to a SQLite key-value database.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database at `path`, apply pragmas and run
    /// pending migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, discarded on drop.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> StoreResult<Self> {
        Self::apply_pragmas(&conn)?;
        migration::run_all(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the locked connection.
    fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("sqlite connection: {e}")))?;
        f(&mut conn)
    }

    // -----------------------------------------------------------------------
    // Pragmas
    // -----------------------------------------------------------------------

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // Readers in other processes must not block a writer.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // A power loss may drop the last commit but never corrupts the file.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.pragma_update(None, "temp_store", "MEMORY")?;

        // Another process may hold the write lock; wait instead of failing.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        debug!("database pragmas applied (WAL, busy_timeout 5s)");
        Ok(())
    }
}

fn next_revision(tx: &rusqlite::Transaction<'_>) -> StoreResult<u64> {
    let current: i64 = tx.query_row(
        "SELECT COALESCE(MAX(revision), 0) FROM kv_entries",
        [],
        |row| row.get(0),
    )?;
    Ok(current as u64 + 1)
}

impl StorageBackend for SqliteBackend {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|conn| {
            let value: Option<Option<String>> = conn
                .query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.flatten())
        })
    }

    fn save(&self, key: &str, value: &str, origin: Uuid) -> StoreResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let revision = next_revision(&tx)?;
            tx.execute(
                "INSERT INTO kv_entries (key, value, revision, origin) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                 revision = excluded.revision, origin = excluded.origin",
                rusqlite::params![key, value, revision as i64, origin.to_string()],
            )?;
            tx.commit()?;
            debug!(key, revision, "kv entry saved");
            Ok(())
        })
    }

    fn delete(&self, key: &str, origin: Uuid) -> StoreResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let live: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM kv_entries WHERE key = ?1 AND value IS NOT NULL",
                    rusqlite::params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if live.is_none() {
                return Ok(());
            }

            let revision = next_revision(&tx)?;
            tx.execute(
                "UPDATE kv_entries SET value = NULL, revision = ?2, origin = ?3 WHERE key = ?1",
                rusqlite::params![key, revision as i64, origin.to_string()],
            )?;
            tx.commit()?;
            debug!(key, revision, "kv entry removed");
            Ok(())
        })
    }

    fn changes_since(&self, revision: u64) -> StoreResult<Vec<Change>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, revision, origin FROM kv_entries \
                 WHERE revision > ?1 ORDER BY revision",
            )?;
            let rows = stmt.query_map(rusqlite::params![revision as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut changes = Vec::new();
            for row in rows {
                let (key, value, revision, origin) = row?;
                // A foreign writer with a garbled origin is still foreign.
                let origin = Uuid::parse_str(&origin).unwrap_or(Uuid::nil());
                changes.push(Change {
                    key,
                    value,
                    revision: revision as u64,
                    origin,
                });
            }
            Ok(changes)
        })
    }

    fn latest_revision(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let revision: i64 = conn.query_row(
                "SELECT COALESCE(MAX(revision), 0) FROM kv_entries",
                [],
                |row| row.get(0),
            )?;
            Ok(revision as u64)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
