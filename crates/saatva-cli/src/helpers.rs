//! Shared setup used by every subcommand.

use std::sync::Arc;

use anyhow::{Context, Result};
use saatva_store::{Alert, JournalEntry, PersistentStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::SaatvaConfig;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Install a compact `tracing` subscriber honouring `RUST_LOG`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Open the one store this process reads and writes through.
pub fn open_store(config: &SaatvaConfig) -> Result<Arc<PersistentStore>> {
    let path = &config.storage.path;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    }

    let store = PersistentStore::open(path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    info!(path = %path.display(), "store initialized");
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One-paragraph rendering of a journal entry.
pub fn format_entry(entry: &JournalEntry) -> String {
    let mood = entry
        .mood
        .as_deref()
        .map(|m| format!("  {m}"))
        .unwrap_or_default();
    format!(
        "{}  {}{}\n  id: {}\n  {}",
        entry.date, entry.title, mood, entry.id, entry.content
    )
}

/// One-paragraph rendering of an alert.
pub fn format_alert(alert: &Alert) -> String {
    let marker = if alert.read { " " } else { "*" };
    let action = if alert.action_required {
        "  [action required]"
    } else {
        ""
    };
    format!(
        "{marker} [{}] {}{action}\n  id: {}  {}\n  {}",
        alert.kind,
        alert.title,
        alert.id,
        alert.timestamp.format("%Y-%m-%d %H:%M"),
        alert.message
    )
}
