//! Volatile storage backend.
//!
//! [`MemoryBackend`] is cheaply cloneable and all clones share the same
//! map, so two stores built on clones of one backend behave like two
//! processes sharing a device's durable storage. It can also be switched
//! into a read-only mode to model an exhausted quota.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::backend::{Change, StorageBackend};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Record {
    value: Option<String>,
    revision: u64,
    origin: Uuid,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, Record>,
    revision: u64,
}

/// Shared in-memory key-value backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    read_only: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `save`/`delete` calls fail with
    /// [`StoreError::Unavailable`] (or succeed again when `false`).
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Store raw text under `key` without going through a store, as if
    /// another program had written it.
    pub fn insert_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        self.save(key, value, Uuid::nil())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("memory backend: {e}")))
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend is read-only".into()));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        let inner = self.lock()?;
        Ok(inner.records.get(key).and_then(|r| r.value.clone()))
    }

    fn save(&self, key: &str, value: &str, origin: Uuid) -> StoreResult<()> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        inner.revision += 1;
        let revision = inner.revision;
        inner.records.insert(
            key.to_string(),
            Record {
                value: Some(value.to_string()),
                revision,
                origin,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str, origin: Uuid) -> StoreResult<()> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        let live = inner
            .records
            .get(key)
            .is_some_and(|r| r.value.is_some());
        if !live {
            return Ok(());
        }

        inner.revision += 1;
        let revision = inner.revision;
        inner.records.insert(
            key.to_string(),
            Record {
                value: None,
                revision,
                origin,
            },
        );
        Ok(())
    }

    fn changes_since(&self, revision: u64) -> StoreResult<Vec<Change>> {
        let inner = self.lock()?;
        let mut changes: Vec<Change> = inner
            .records
            .iter()
            .filter(|(_, r)| r.revision > revision)
            .map(|(key, r)| Change {
                key: key.clone(),
                value: r.value.clone(),
                revision: r.revision,
                origin: r.origin,
            })
            .collect();
        changes.sort_by_key(|c| c.revision);
        Ok(changes)
    }

    fn latest_revision(&self) -> StoreResult<u64> {
        Ok(self.lock()?.revision)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
