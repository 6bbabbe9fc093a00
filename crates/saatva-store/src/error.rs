//! Error types for the saatva-store crate.
//!
//! Backend operations return [`StoreError`] via [`StoreResult`]. The
//! [`PersistentStore`](crate::PersistentStore) facade absorbs these and
//! degrades to safe defaults; only the collections surface caller-facing
//! failures, through [`JournalError`] and [`AlertError`].

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The backend cannot persist (quota exceeded, disabled, read-only).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A lock guarding backend state was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// A required form field was left empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} must not be empty")]
pub struct ValidationError {
    /// Name of the offending field.
    pub field: &'static str,
}

/// Errors surfaced by [`Journal`](crate::Journal) save operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalError {
    /// Title or content was empty; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The entry being edited no longer exists in the collection.
    #[error("journal entry not found: {id}")]
    NotFound { id: String },
}

/// Errors surfaced by [`Alerts`](crate::Alerts) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    /// Title or message was empty; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No alert with this id is in the inbox.
    #[error("alert not found: {id}")]
    NotFound { id: String },
}
