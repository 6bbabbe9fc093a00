//! Journal entries persisted through a [`PersistentStore`].
//!
//! The whole collection lives under one key, newest first. Saving a draft
//! either prepends a new entry or replaces an existing one in place; an
//! edit never changes an entry's id, creation date or position.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{JournalError, ValidationError};
use crate::store::{PersistentStore, StorageEvent, Subscription};

/// Storage key holding the serialized entry collection.
pub const JOURNAL_KEY: &str = "journalEntries";

/// Mood tags offered by the editor. Free text is accepted as well.
pub const MOODS: [&str; 8] = [
    "😊 Happy",
    "😔 Sad",
    "😌 Calm",
    "😟 Anxious",
    "😡 Angry",
    "🤔 Thoughtful",
    "😴 Tired",
    "🥰 Grateful",
];

/// A single journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique identifier (UUID v7), fixed at creation.
    pub id: String,
    pub title: String,
    pub content: String,
    /// Calendar day the entry was first saved (UTC), serialized as
    /// `YYYY-MM-DD`.
    pub date: NaiveDate,
    /// Optional mood tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
}

/// Editor state for composing or revising an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalDraft {
    pub title: String,
    pub content: String,
    pub mood: Option<String>,
    /// Id of the entry being edited, or `None` when composing a new one.
    pub editing_id: Option<String>,
}

impl JournalDraft {
    /// A blank draft for a new entry.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Set the mood tag. An empty string clears it.
    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        let mood = mood.into();
        self.mood = (!mood.trim().is_empty()).then_some(mood);
        self
    }

    /// Whether saving would revise an existing entry.
    pub fn is_editing(&self) -> bool {
        self.editing_id.is_some()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError { field: "title" });
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError { field: "content" });
        }
        Ok(())
    }
}

/// The journal collection, owned by one shared store.
#[derive(Debug, Clone)]
pub struct Journal {
    store: Arc<PersistentStore>,
}

impl Journal {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    /// All entries, newest first. A corrupt collection reads as empty.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.store.read(JOURNAL_KEY, Vec::new())
    }

    /// Look up one entry by id.
    pub fn get(&self, id: &str) -> Option<JournalEntry> {
        self.entries().into_iter().find(|e| e.id == id)
    }

    /// Load an existing entry into a draft for editing.
    pub fn edit(&self, id: &str) -> Option<JournalDraft> {
        self.get(id).map(|entry| JournalDraft {
            title: entry.title,
            content: entry.content,
            mood: entry.mood,
            editing_id: Some(entry.id),
        })
    }

    /// Save `draft`, returning the stored entry.
    ///
    /// Empty title or content, or an `editing_id` that no longer exists,
    /// leaves the collection untouched.
    #[instrument(skip(self, draft), fields(editing = draft.is_editing()))]
    pub fn save(&self, draft: JournalDraft) -> Result<JournalEntry, JournalError> {
        draft.validate()?;

        let mut entries = self.entries();
        let entry = match draft.editing_id {
            Some(id) => {
                let slot = entries
                    .iter_mut()
                    .find(|e| e.id == id)
                    .ok_or(JournalError::NotFound { id })?;
                slot.title = draft.title;
                slot.content = draft.content;
                slot.mood = draft.mood;
                let entry = slot.clone();
                info!(id = %entry.id, "journal entry updated");
                entry
            }
            None => {
                let entry = JournalEntry {
                    id: Uuid::now_v7().to_string(),
                    title: draft.title,
                    content: draft.content,
                    date: Utc::now().date_naive(),
                    mood: draft.mood,
                };
                entries.insert(0, entry.clone());
                info!(id = %entry.id, "journal entry created");
                entry
            }
        };

        self.store.write(JOURNAL_KEY, entries);
        Ok(entry)
    }

    /// Entries whose title or content contains `term`, ignoring case.
    /// An empty term matches everything.
    pub fn search(&self, term: &str) -> Vec<JournalEntry> {
        let needle = term.to_lowercase();
        self.entries()
            .into_iter()
            .filter(|e| {
                e.title.to_lowercase().contains(&needle)
                    || e.content.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Be told when another process rewrites the collection.
    pub fn on_external_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        self.store.subscribe(JOURNAL_KEY, callback)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
