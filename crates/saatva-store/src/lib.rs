//! # saatva-store
//!
//! Durable storage for Saatva.
//!
//! A [`PersistentStore`] maps logical keys to serializable values, keeps
//! an in-memory mirror for synchronous reads, and reports writes made by
//! other processes sharing the same backend. The [`Journal`] and
//! [`Alerts`] collections are built on top of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Journal (journalEntries key)           │
//! │  Alerts (alerts key)                    │
//! ├─────────────────────────────────────────┤
//! │  PersistentStore                        │
//! │    mirror (dashmap) + subscriptions     │
//! │    poll_external / spawn_watcher        │
//! ├─────────────────────────────────────────┤
//! │  StorageBackend                         │
//! │    SqliteBackend (WAL, migrations)      │
//! │    MemoryBackend (shared, volatile)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use saatva_store::{Journal, JournalDraft, PersistentStore};
//!
//! let store = Arc::new(PersistentStore::open("data/saatva.db")?);
//! let journal = Journal::new(Arc::clone(&store));
//! journal.save(JournalDraft::new("Today", "Went for a walk."))?;
//! ```

pub mod alerts;
pub mod backend;
pub mod db;
pub mod error;
pub mod journal;
pub mod memory;
pub mod migration;
pub mod store;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use alerts::{ALERTS_KEY, Alert, AlertFilter, AlertKind, Alerts};
pub use backend::{Change, StorageBackend};
pub use db::SqliteBackend;
pub use error::{AlertError, JournalError, StoreError, StoreResult, ValidationError};
pub use journal::{JOURNAL_KEY, Journal, JournalDraft, JournalEntry, MOODS};
pub use memory::MemoryBackend;
pub use store::{PersistentStore, StorageCallback, StorageEvent, Subscription, WatcherHandle};
