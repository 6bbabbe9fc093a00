//! CLI argument definitions for Saatva.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use saatva_store::{AlertFilter, AlertKind};

/// Saatva -- a personal wellness companion.
#[derive(Parser)]
#[command(
    name = "saatva",
    version,
    about = "Saatva -- personal wellness companion",
    long_about = "Keep a private journal, talk things through with the companion, and stay \
                  signed in across runs on this device."
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in with a username and password.
    Login {
        username: String,

        #[arg(long, short)]
        password: String,

        /// Do not remember the login after this command exits.
        #[arg(long)]
        ephemeral: bool,
    },

    /// Create an account (validated locally only).
    Signup {
        username: String,

        #[arg(long, short)]
        email: String,

        #[arg(long, short)]
        password: String,

        /// Repeat the password.
        #[arg(long)]
        confirm: String,
    },

    /// Forget the remembered login.
    Logout,

    /// Show who is logged in.
    Whoami,

    /// Manage journal entries.
    Journal {
        #[command(subcommand)]
        action: JournalAction,
    },

    /// Review wellness alerts.
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },

    /// Talk to the wellness companion.
    Chat,

    /// Follow login and journal changes made by other Saatva processes.
    Watch,
}

/// Actions for managing journal entries.
#[derive(Subcommand)]
pub enum JournalAction {
    /// Write a new entry.
    Add {
        #[arg(long, short)]
        title: String,

        #[arg(long, short)]
        content: String,

        #[arg(long, short)]
        mood: Option<String>,
    },
    /// Revise an existing entry. Omitted fields keep their current value.
    Edit {
        id: String,

        #[arg(long, short)]
        title: Option<String>,

        #[arg(long, short)]
        content: Option<String>,

        /// New mood tag; pass an empty string to clear it.
        #[arg(long, short)]
        mood: Option<String>,
    },
    /// List all entries, newest first.
    List,
    /// Show entries whose title or content contains a term.
    Search { term: String },
    /// List the suggested mood tags.
    Moods,
}

/// Actions for the alerts inbox.
#[derive(Subcommand)]
pub enum AlertAction {
    /// Show alerts with unread and critical counts.
    List {
        #[arg(long, short, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,
    },
    /// Mark one alert as read.
    Read { id: String },
    /// Mark every alert as read.
    ReadAll,
    /// Remove an alert from the inbox.
    Dismiss { id: String },
    /// Add an alert (critical, warning or info).
    Raise {
        #[arg(long, short)]
        kind: AlertKind,

        #[arg(long, short)]
        title: String,

        #[arg(long, short)]
        message: String,

        #[arg(long)]
        action_required: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FilterArg {
    All,
    Unread,
    Critical,
}

impl From<FilterArg> for AlertFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::All => Self::All,
            FilterArg::Unread => Self::Unread,
            FilterArg::Critical => Self::Critical,
        }
    }
}
