//! Wellness alerts inbox persisted through a [`PersistentStore`].
//!
//! Alerts are kept newest first under one key. Each carries a severity and
//! a read flag; the inbox can be filtered, marked read one at a time or all
//! at once, and individual alerts dismissed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{AlertError, ValidationError};
use crate::store::{PersistentStore, StorageEvent, Subscription};

/// Storage key holding the serialized alert collection.
pub const ALERTS_KEY: &str = "alerts";

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

/// One inbox alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    /// The user is expected to do something about it.
    #[serde(default)]
    pub action_required: bool,
}

/// Which alerts to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlertFilter {
    #[default]
    All,
    Unread,
    Critical,
}

impl AlertFilter {
    pub fn matches(self, alert: &Alert) -> bool {
        match self {
            Self::All => true,
            Self::Unread => !alert.read,
            Self::Critical => alert.kind == AlertKind::Critical,
        }
    }

    /// What to show when nothing matches.
    pub fn empty_message(self) -> &'static str {
        match self {
            Self::All => "You're all caught up! No new alerts at this time.",
            Self::Unread => "No unread alerts to display.",
            Self::Critical => "No critical alerts to display.",
        }
    }
}

/// The alerts inbox, owned by one shared store.
#[derive(Debug, Clone)]
pub struct Alerts {
    store: Arc<PersistentStore>,
}

impl Alerts {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    /// Every alert, newest first. A corrupt collection reads as empty.
    pub fn all(&self) -> Vec<Alert> {
        self.store.read(ALERTS_KEY, Vec::new())
    }

    pub fn list(&self, filter: AlertFilter) -> Vec<Alert> {
        self.all()
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.all().iter().filter(|a| !a.read).count()
    }

    /// Critical alerts, read or not.
    pub fn critical_count(&self) -> usize {
        self.all()
            .iter()
            .filter(|a| a.kind == AlertKind::Critical)
            .count()
    }

    /// Add an unread alert at the top of the inbox.
    #[instrument(skip(self, title, message))]
    pub fn raise(
        &self,
        kind: AlertKind,
        title: &str,
        message: &str,
        action_required: bool,
    ) -> Result<Alert, AlertError> {
        if title.trim().is_empty() {
            return Err(ValidationError { field: "title" }.into());
        }
        if message.trim().is_empty() {
            return Err(ValidationError { field: "message" }.into());
        }

        let alert = Alert {
            id: Uuid::now_v7().to_string(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            read: false,
            action_required,
        };
        let mut alerts = self.all();
        alerts.insert(0, alert.clone());
        self.store.write(ALERTS_KEY, alerts);
        info!(id = %alert.id, "alert raised");
        Ok(alert)
    }

    /// Mark one alert read. Returns whether it was unread before.
    pub fn mark_read(&self, id: &str) -> Result<bool, AlertError> {
        let mut alerts = self.all();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AlertError::NotFound { id: id.to_string() })?;
        if alert.read {
            return Ok(false);
        }
        alert.read = true;
        self.store.write(ALERTS_KEY, alerts);
        debug!(id, "alert marked read");
        Ok(true)
    }

    /// Mark every alert read, returning how many changed.
    pub fn mark_all_read(&self) -> usize {
        let mut alerts = self.all();
        let mut changed = 0;
        for alert in alerts.iter_mut().filter(|a| !a.read) {
            alert.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.store.write(ALERTS_KEY, alerts);
            debug!(changed, "all alerts marked read");
        }
        changed
    }

    /// Remove an alert from the inbox and return it.
    pub fn dismiss(&self, id: &str) -> Result<Alert, AlertError> {
        let mut alerts = self.all();
        let index = alerts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| AlertError::NotFound { id: id.to_string() })?;
        let removed = alerts.remove(index);
        self.store.write(ALERTS_KEY, alerts);
        info!(id, "alert dismissed");
        Ok(removed)
    }

    /// Be told when another process changes the inbox.
    pub fn on_external_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        self.store.subscribe(ALERTS_KEY, callback)
    }
}
