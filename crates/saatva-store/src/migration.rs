//! Versioned schema for the SQLite backend.
//!
//! Each step runs in its own immediate transaction together with the row
//! that records it in `_migrations`, so a crash mid-upgrade leaves the
//! database at the previous version.

use rusqlite::{Connection, TransactionBehavior, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// `(version, name, sql)`, strictly increasing by version. Append only.
const STEPS: &[(u32, &str, &str)] = &[
    (
        1,
        "key-value entries with tombstones",
        "CREATE TABLE kv_entries (
             key      TEXT PRIMARY KEY,
             value    TEXT,
             revision INTEGER NOT NULL,
             origin   TEXT NOT NULL
         );",
    ),
    (
        2,
        "revision index for change polling",
        "CREATE INDEX idx_kv_entries_revision ON kv_entries(revision);",
    ),
];

fn migration_error(version: u32, what: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Migration {
        version,
        message: format!("{what}: {err}"),
    }
}

/// Bring `conn` up to the newest schema version.
pub fn run_all(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
             version    INTEGER PRIMARY KEY,
             name       TEXT NOT NULL,
             applied_at INTEGER NOT NULL
         );",
    )
    .map_err(|e| migration_error(0, "create _migrations", e))?;

    let from = schema_version(conn)?;
    let mut applied = 0;
    for &(version, name, sql) in STEPS.iter().filter(|(v, _, _)| *v > from) {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| migration_error(version, "begin", e))?;
        tx.execute_batch(sql)
            .map_err(|e| migration_error(version, name, e))?;
        tx.execute(
            "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![version, name, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| migration_error(version, "record", e))?;
        tx.commit()
            .map_err(|e| migration_error(version, "commit", e))?;

        info!(version, name, "schema migrated");
        applied += 1;
    }

    if applied == 0 {
        debug!(version = from, "schema up to date");
    }
    Ok(())
}

/// Highest applied version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row("SELECT IFNULL(MAX(version), 0) FROM _migrations", [], |row| {
        row.get(0)
    })
    .map_err(|e| migration_error(0, "read schema version", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();
        conn
    }

    fn newest() -> u32 {
        STEPS.last().map(|(v, _, _)| *v).unwrap_or(0)
    }

    #[test]
    fn steps_strictly_increase() {
        assert!(STEPS.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn fresh_database_reaches_newest_version() {
        assert_eq!(schema_version(&migrated()).unwrap(), newest());
    }

    #[test]
    fn rerun_is_a_noop() {
        let mut conn = migrated();
        run_all(&mut conn).unwrap();
        let rows: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows as usize, STEPS.len());
    }

    #[test]
    fn value_column_allows_tombstones() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO kv_entries (key, value, revision, origin) VALUES ('k', NULL, 1, 'o')",
            [],
        )
        .unwrap();

        let value: Option<String> = conn
            .query_row("SELECT value FROM kv_entries WHERE key = 'k'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(value.is_none());
    }
}
