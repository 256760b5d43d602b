//! mail2sqlite - mirror a Gmail or IMAP mailbox into a local SQLite database
//!
//! This is the command-line entry point; all mirroring logic lives in the
//! `mirror` crate.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use mirror::{ClobberField, ProviderKind, SqliteMailStore, SyncOptions, SyncStats};

/// Database file inside the data directory
const DB_FILE: &str = "messages.db";

/// Exit status after an immediate interrupt (128 + SIGINT)
const INTERRUPTED_EXIT: i32 = 130;

/// What a Ctrl-C should do right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// The sync loop will stop after the current message
    Deferred,
    /// Nothing is polling the flag, or this is a repeat; leave now
    ExitNow,
}

/// Interrupt bookkeeping shared between the signal task and the worker
#[derive(Debug, Default)]
struct InterruptState {
    cancel: AtomicBool,
    /// Set only while the per-message loop is running
    syncing: AtomicBool,
}

impl InterruptState {
    fn on_interrupt(&self) -> Interrupt {
        let repeated = self.cancel.swap(true, Ordering::SeqCst);
        if repeated || !self.syncing.load(Ordering::SeqCst) {
            Interrupt::ExitNow
        } else {
            Interrupt::Deferred
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run `f` with interrupts deferred to the sync loop's cancel checks
    fn syncing<T>(&self, f: impl FnOnce(&AtomicBool) -> T) -> T {
        self.syncing.store(true, Ordering::SeqCst);
        let result = f(&self.cancel);
        self.syncing.store(false, Ordering::SeqCst);
        result
    }
}

#[derive(Parser)]
#[command(name = "mail2sqlite")]
#[command(about = "Mirror a Gmail or IMAP mailbox into a local SQLite database")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the database and credential files
    #[arg(long, global = true, env = "MAIL2SQLITE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Mail backend to mirror (gmail or imap)
    #[arg(long, global = true, default_value = "gmail")]
    provider: ProviderKind,

    /// Fields allowed to overwrite already-stored values on re-sync
    #[arg(long, global = true, num_args = 1.., value_delimiter = ',')]
    clobber: Vec<ClobberField>,

    /// Download and store attachment content
    #[arg(long, global = true)]
    download_attachments: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Sync new and older messages (everything with --full-sync)
    Sync {
        /// Ignore what is already stored and list the whole mailbox
        #[arg(long)]
        full_sync: bool,
    },
    /// Sync a single message by provider id
    SyncMessage {
        /// Provider message id
        id: String,
    },
    /// Re-link replies to their parents across the whole store
    RebuildThreads,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let state = Arc::new(InterruptState::default());

    let signals = state.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match signals.on_interrupt() {
                Interrupt::Deferred => info!(
                    "Interrupt received, stopping after the current message (Ctrl-C again to quit now)"
                ),
                Interrupt::ExitNow => {
                    // Committed writes are durable; the open transaction rolls back
                    println!("Exiting gracefully...");
                    std::process::exit(INTERRUPTED_EXIT);
                }
            }
        }
    });

    let worker_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || run(cli, &worker_state)).await;

    match outcome {
        Ok(Ok(())) if state.cancelled() => {
            println!("Exiting gracefully...");
            ExitCode::SUCCESS
        }
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: worker task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Open the store, run the command, and always close the store afterwards
fn run(cli: Cli, interrupts: &InterruptState) -> Result<()> {
    let data_dir = config::init(cli.data_dir.as_deref())?;
    let db_path = data_dir.join(DB_FILE);
    info!("Using database {}", db_path.display());

    let store = SqliteMailStore::new(&db_path)?;
    let result = execute(&cli, &data_dir, &store, interrupts);
    store.close().context("Failed to close the database")?;
    result
}

fn execute(
    cli: &Cli,
    data_dir: &Path,
    store: &SqliteMailStore,
    interrupts: &InterruptState,
) -> Result<()> {
    let options = |full_sync: bool| SyncOptions {
        full_sync,
        clobber: cli.clobber.iter().copied().collect(),
        download_attachments: cli.download_attachments,
        ..Default::default()
    };

    match &cli.command {
        Command::Sync { full_sync } => {
            let mut provider = mirror::connect(cli.provider, data_dir)?;
            let options = options(*full_sync);
            let stats = interrupts
                .syncing(|cancel| mirror::sync_all(provider.as_mut(), store, &options, cancel))?;
            report(&stats);
        }
        Command::SyncMessage { id } => {
            let mut provider = mirror::connect(cli.provider, data_dir)?;
            let stats = mirror::sync_message(provider.as_mut(), store, id, &options(false))?;
            report(&stats);
        }
        Command::RebuildThreads => {
            let stats = mirror::rebuild_threads(store)?;
            println!(
                "Linked {} replies ({} unchanged, {} unresolved)",
                stats.linked, stats.unchanged, stats.unresolved
            );
        }
    }
    Ok(())
}

fn report(stats: &SyncStats) {
    println!(
        "Synced {} of {} messages ({} errors), {} attachments saved, {} threads linked",
        stats.messages_synced,
        stats.messages_listed,
        stats.errors,
        stats.attachments_saved,
        stats.threads_linked
    );
    if stats.interrupted {
        println!("Sync interrupted; run again to resume");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::try_parse_from([
            "mail2sqlite",
            "--provider",
            "imap",
            "--clobber",
            "subject,is_read",
            "--download-attachments",
            "sync",
            "--full-sync",
        ])
        .unwrap();

        assert_eq!(cli.provider, ProviderKind::Imap);
        assert_eq!(cli.clobber, vec![ClobberField::Subject, ClobberField::IsRead]);
        assert!(cli.download_attachments);
        assert!(matches!(cli.command, Command::Sync { full_sync: true }));
    }

    #[test]
    fn test_parse_sync_message() {
        let cli = Cli::try_parse_from(["mail2sqlite", "sync-message", "18c2f0a"]).unwrap();
        assert_eq!(cli.provider, ProviderKind::Gmail);
        assert!(matches!(cli.command, Command::SyncMessage { ref id } if id == "18c2f0a"));
    }

    #[test]
    fn test_unknown_clobber_field_is_rejected() {
        let result = Cli::try_parse_from(["mail2sqlite", "--clobber", "colour", "sync"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rebuild_threads_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "mail2sqlite",
            "--data-dir",
            dir.path().to_str().unwrap(),
            "rebuild-threads",
        ])
        .unwrap();

        run(cli, &InterruptState::default()).unwrap();
        assert!(dir.path().join(DB_FILE).exists());
    }

    #[test]
    fn test_interrupt_outside_sync_loop_exits_now() {
        let state = InterruptState::default();
        assert_eq!(state.on_interrupt(), Interrupt::ExitNow);
        assert!(state.cancelled());
    }

    #[test]
    fn test_interrupt_during_sync_is_deferred_then_repeat_exits() {
        let state = InterruptState::default();
        state.syncing(|cancel| {
            assert_eq!(state.on_interrupt(), Interrupt::Deferred);
            assert!(cancel.load(Ordering::SeqCst));
            assert_eq!(state.on_interrupt(), Interrupt::ExitNow);
        });
    }

    #[test]
    fn test_interrupt_after_sync_loop_exits_now() {
        let state = InterruptState::default();
        state.syncing(|_| ());
        assert_eq!(state.on_interrupt(), Interrupt::ExitNow);
    }
}
