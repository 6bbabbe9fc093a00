//! The durable-storage seam behind [`PersistentStore`](crate::PersistentStore).
//!
//! A backend is a flat map from key to serialized text. Every mutation
//! bumps a backend-wide revision counter and records which store instance
//! made it, so a store can later ask "what changed since revision N, and
//! who changed it" to detect writes made by other processes.

use uuid::Uuid;

use crate::error::StoreResult;

/// The latest state of one key as recorded by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Logical key.
    pub key: String,
    /// Serialized value, or `None` if the key was removed.
    pub value: Option<String>,
    /// Backend revision at which this state was written.
    pub revision: u64,
    /// Identity of the store instance that wrote it.
    pub origin: Uuid,
}

/// Durable key-value storage shared by one or more store instances.
///
/// Implementations must make `save` and `delete` atomic: a concurrent
/// reader sees either the old value or the new one.
pub trait StorageBackend: Send + Sync {
    /// Load the serialized value for `key`, or `None` if absent.
    fn load(&self, key: &str) -> StoreResult<Option<String>>;

    /// Persist `value` under `key` on behalf of `origin`.
    fn save(&self, key: &str, value: &str, origin: Uuid) -> StoreResult<()>;

    /// Remove `key` on behalf of `origin`. Removing an absent key is a
    /// no-op and does not bump the revision.
    fn delete(&self, key: &str, origin: Uuid) -> StoreResult<()>;

    /// Latest state of every key modified after `revision`, ordered by
    /// revision.
    fn changes_since(&self, revision: u64) -> StoreResult<Vec<Change>>;

    /// The highest revision written so far (0 for an empty backend).
    fn latest_revision(&self) -> StoreResult<u64>;
}
