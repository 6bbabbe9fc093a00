//! CLI entry point for Saatva.
//!
//! This binary provides the `saatva` command: account login/logout, the
//! journal, the alerts inbox, the chat companion, and a `watch` mode that follows changes
//! made by other Saatva processes sharing the same data file.

mod cli;
mod config;
mod helpers;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use saatva_companion::{Conversation, Responder, ThinkingDelay};
use saatva_session::{AuthForm, AuthMode, AuthState, SessionState};
use saatva_store::{AlertFilter, Alerts, Journal, JournalDraft, MOODS, PersistentStore};
use tracing::info;

use crate::cli::{AlertAction, Cli, Commands, JournalAction};
use crate::config::SaatvaConfig;
use crate::helpers::{format_alert, format_entry, init_tracing, open_store};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing("info");

    let config = SaatvaConfig::load(&cli.config)?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Login {
            username,
            password,
            ephemeral,
        } => cmd_login(&store, username, password, ephemeral),
        Commands::Signup {
            username,
            email,
            password,
            confirm,
        } => cmd_signup(&store, username, email, password, confirm),
        Commands::Logout => cmd_logout(&store),
        Commands::Whoami => cmd_whoami(&store),
        Commands::Journal { action } => cmd_journal(&store, action),
        Commands::Alerts { action } => cmd_alerts(&store, action),
        Commands::Chat => cmd_chat(&store, &config).await,
        Commands::Watch => cmd_watch(&store, &config).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands: account
// ---------------------------------------------------------------------------

fn cmd_login(
    store: &Arc<PersistentStore>,
    username: String,
    password: String,
    ephemeral: bool,
) -> Result<()> {
    let session = SessionState::new(Arc::clone(store));
    let form = AuthForm::login(username, password);
    let outcome = session.submit(&form, AuthMode::Login, !ephemeral)?;

    println!("{}", outcome.message());
    if ephemeral {
        println!("(not remembered: the login ends when this command exits)");
    }
    Ok(())
}

fn cmd_signup(
    store: &Arc<PersistentStore>,
    username: String,
    email: String,
    password: String,
    confirm_password: String,
) -> Result<()> {
    let session = SessionState::new(Arc::clone(store));
    let form = AuthForm {
        username,
        email,
        password,
        confirm_password,
    };
    let outcome = session.submit(&form, AuthMode::Signup, false)?;
    println!("{}", outcome.message());
    Ok(())
}

fn cmd_logout(store: &Arc<PersistentStore>) -> Result<()> {
    let session = SessionState::new(Arc::clone(store));
    session.logout();
    println!("Logged out.");
    Ok(())
}

fn cmd_whoami(store: &Arc<PersistentStore>) -> Result<()> {
    let session = SessionState::new(Arc::clone(store));
    println!("{}", session.current());
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: journal
// ---------------------------------------------------------------------------

fn cmd_journal(store: &Arc<PersistentStore>, action: JournalAction) -> Result<()> {
    let journal = Journal::new(Arc::clone(store));

    match action {
        JournalAction::Add {
            title,
            content,
            mood,
        } => {
            let draft = JournalDraft::new(title, content).with_mood(mood.unwrap_or_default());
            let entry = journal.save(draft)?;
            println!("Saved entry {}.", entry.id);
        }
        JournalAction::Edit {
            id,
            title,
            content,
            mood,
        } => {
            let Some(mut draft) = journal.edit(&id) else {
                bail!("no journal entry with id {id}");
            };
            if let Some(title) = title {
                draft.title = title;
            }
            if let Some(content) = content {
                draft.content = content;
            }
            if let Some(mood) = mood {
                draft = draft.with_mood(mood);
            }
            let entry = journal.save(draft)?;
            println!("Updated entry {}.", entry.id);
        }
        JournalAction::List => {
            let entries = journal.entries();
            if entries.is_empty() {
                println!("No entries yet.");
            }
            for entry in &entries {
                println!("{}\n", format_entry(entry));
            }
        }
        JournalAction::Search { term } => {
            let found = journal.search(&term);
            println!("Matching entries ({}):\n", found.len());
            for entry in &found {
                println!("{}\n", format_entry(entry));
            }
        }
        JournalAction::Moods => {
            for mood in MOODS {
                println!("{mood}");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: alerts
// ---------------------------------------------------------------------------

fn cmd_alerts(store: &Arc<PersistentStore>, action: AlertAction) -> Result<()> {
    let alerts = Alerts::new(Arc::clone(store));

    match action {
        AlertAction::List { filter } => {
            let filter = AlertFilter::from(filter);
            println!(
                "{} unread, {} critical\n",
                alerts.unread_count(),
                alerts.critical_count()
            );
            let shown = alerts.list(filter);
            if shown.is_empty() {
                println!("{}", filter.empty_message());
            }
            for alert in &shown {
                println!("{}\n", format_alert(alert));
            }
        }
        AlertAction::Read { id } => {
            if alerts.mark_read(&id)? {
                println!("Marked {id} as read.");
            } else {
                println!("{id} was already read.");
            }
        }
        AlertAction::ReadAll => {
            let changed = alerts.mark_all_read();
            println!("Marked {changed} alerts as read.");
        }
        AlertAction::Dismiss { id } => {
            let alert = alerts.dismiss(&id)?;
            println!("Dismissed \"{}\".", alert.title);
        }
        AlertAction::Raise {
            kind,
            title,
            message,
            action_required,
        } => {
            let alert = alerts.raise(kind, &title, &message, action_required)?;
            println!("Raised alert {}.", alert.id);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

async fn cmd_chat(store: &Arc<PersistentStore>, config: &SaatvaConfig) -> Result<()> {
    let session = SessionState::new(Arc::clone(store));
    let delay = ThinkingDelay::from_millis(
        config.companion.min_delay_ms,
        config.companion.max_delay_ms,
    )?;
    let conversation = Conversation::new(Responder::new()?, delay);

    if let Some(name) = session.username() {
        println!("  Signed in as {name}.");
    }
    for message in conversation.messages() {
        println!("bot> {}", message.text);
    }
    println!("  Type a message, or 'quit' to exit.\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("you> ");
        io::stdout().flush().context("failed to flush stdout")?;

        let Some(line) = lines.next() else { break };
        let line = line.context("failed to read input")?;
        let trimmed = line.trim();
        if trimmed == "quit" || trimmed == "exit" {
            info!("user requested exit");
            break;
        }

        let Some(pending) = conversation.send(trimmed) else {
            continue;
        };
        println!("  ...");
        if let Some(reply) = pending.wait().await {
            println!("bot> {}\n", reply.text);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: watch
// ---------------------------------------------------------------------------

async fn cmd_watch(store: &Arc<PersistentStore>, config: &SaatvaConfig) -> Result<()> {
    let session = SessionState::new(Arc::clone(store));
    let journal = Journal::new(Arc::clone(store));

    println!("Session: {}", session.current());
    println!("Journal: {} entries", journal.entries().len());
    println!("Watching for changes from other processes (Ctrl-C to stop)...");

    let _session_listener = session.subscribe(|state: &AuthState| {
        println!("Session changed: {state}");
    });
    let counter = journal.clone();
    let _journal_listener = journal.on_external_change(move |_| {
        println!("Journal changed: {} entries", counter.entries().len());
    });
    let alerts = Alerts::new(Arc::clone(store));
    let inbox = alerts.clone();
    let _alerts_listener = alerts.on_external_change(move |_| {
        println!("Alerts changed: {} unread", inbox.unread_count());
    });
    let _watcher = store.spawn_watcher(config.storage.watch_interval());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("watch stopped");
    Ok(())
}
