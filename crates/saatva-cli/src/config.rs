//! Configuration loading.
//!
//! Reads `config/default.toml` (or the path given with `--config`) and
//! applies `SAATVA_*` environment overrides on top. A missing file or
//! section falls back to defaults; a file that fails to parse is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SaatvaConfig {
    pub storage: StorageConfig,
    pub companion: CompanionConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding all durable state.
    pub path: PathBuf,
    /// How often `watch` polls for changes from other processes.
    pub watch_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/saatva.db"),
            watch_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms.max(1))
    }
}

/// `[companion]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_500,
            max_delay_ms: 2_500,
        }
    }
}

impl SaatvaConfig {
    /// Load from `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            Err(_) => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SAATVA_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("SAATVA_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(ms) = lookup("SAATVA_WATCH_INTERVAL_MS") {
            self.storage.watch_interval_ms =
                ms.parse().context("SAATVA_WATCH_INTERVAL_MS must be an integer")?;
        }
        if let Some(ms) = lookup("SAATVA_COMPANION_MIN_DELAY_MS") {
            self.companion.min_delay_ms = ms
                .parse()
                .context("SAATVA_COMPANION_MIN_DELAY_MS must be an integer")?;
        }
        if let Some(ms) = lookup("SAATVA_COMPANION_MAX_DELAY_MS") {
            self.companion.max_delay_ms = ms
                .parse()
                .context("SAATVA_COMPANION_MAX_DELAY_MS must be an integer")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
