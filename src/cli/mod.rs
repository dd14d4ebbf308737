//! Command-line interface for voxsync.
//!
//! Provides commands for capturing recordings, inspecting the local store,
//! and driving the sync coordinator (one-shot or long-running).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use crate::adapters::{HttpMetadataStore, HttpObjectStore, HttpProbe, MetadataStore};
use crate::config::{self, ResolvedConfig};
use crate::core::{LocalStore, ProbeMonitor, SyncCoordinator, SyncHandle};
use crate::domain::{Payload, Recording, SyncMessage, SyncStatus};

/// voxsync - Offline-first audio recording sync engine
#[derive(Parser, Debug)]
#[command(name = "voxsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture an audio file as a local recording and upload it
    Import {
        /// Audio file to capture
        file: PathBuf,

        /// Duration in seconds
        #[arg(short, long, default_value = "0")]
        duration: f64,

        /// MIME type (guessed from the extension if not specified)
        #[arg(long)]
        content_type: Option<String>,

        /// Only store locally, do not upload now
        #[arg(long)]
        no_upload: bool,
    },

    /// Show recording counts per status
    Status,

    /// List recordings in the local store
    List {
        /// Filter by status
        #[arg(short, long, value_enum)]
        status: Option<StatusFilter>,

        /// Maximum number of recordings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Reset a failed recording and upload it again
    Retry {
        /// Recording ID
        id: String,
    },

    /// Re-drive every pending upload and delete
    RetryAll,

    /// Delete a recording locally and remotely
    Delete {
        /// Recording ID
        id: String,

        /// Remote key (for recordings no longer in the local store)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Run one reconciliation sweep and exit
    Sync,

    /// Run the sync coordinator until Ctrl+C, printing status changes
    Run,

    /// List recordings the metadata store reports as synced
    Remote,

    /// Show resolved configuration (debug)
    Config,
}

/// Status filter for CLI (maps to SyncStatus)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilter {
    Local,
    Uploading,
    Synced,
    Failed,
}

impl From<StatusFilter> for SyncStatus {
    fn from(s: StatusFilter) -> Self {
        match s {
            StatusFilter::Local => SyncStatus::Local,
            StatusFilter::Uploading => SyncStatus::Uploading,
            StatusFilter::Synced => SyncStatus::Synced,
            StatusFilter::Failed => SyncStatus::Failed,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Import {
                file,
                duration,
                content_type,
                no_upload,
            } => import_recording(&file, duration, content_type, no_upload).await,
            Commands::Status => show_status(),
            Commands::List { status, limit } => list_recordings(status, limit),
            Commands::Retry { id } => submit_once(SyncMessage::Retry { id }).await,
            Commands::RetryAll => submit_once(SyncMessage::RetryAll).await,
            Commands::Delete { id, key } => submit_once(SyncMessage::Delete { id, key }).await,
            Commands::Sync => sync_once().await,
            Commands::Run => run_coordinator().await,
            Commands::Remote => list_remote().await,
            Commands::Config => show_config(),
        }
    }
}

/// Open the configured local store
fn open_store(cfg: &ResolvedConfig) -> Result<Arc<LocalStore>> {
    let store = LocalStore::open(&cfg.database)
        .with_context(|| format!("Failed to open local store: {}", cfg.database.display()))?;
    Ok(Arc::new(store))
}

/// Wire the coordinator to the HTTP adapters
fn build_coordinator(cfg: &ResolvedConfig, store: Arc<LocalStore>) -> Result<SyncCoordinator> {
    let base_url = cfg.require_remote_url()?;
    let timeouts = cfg.sync.timeouts();

    let probe_url = cfg.effective_probe_url().unwrap_or(base_url);
    let monitor = ProbeMonitor::new(
        Arc::new(HttpProbe::new(probe_url, timeouts.probe)),
        cfg.sync.probe_interval(),
        timeouts.probe,
    );

    Ok(SyncCoordinator::new(
        store,
        Arc::new(HttpObjectStore::new()),
        Arc::new(HttpMetadataStore::new(base_url)),
        Arc::new(monitor),
        cfg.sync.sync_options(),
    ))
}

/// Wait for everything queued so far, then stop the worker
async fn drain(handle: &SyncHandle, worker: tokio::task::JoinHandle<()>) -> Result<()> {
    handle.flush().await?;
    handle.shutdown().await?;
    worker.await.context("Sync worker panicked")?;
    Ok(())
}

/// Guess a MIME type from the file extension
fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("m4a") | Some("mp4") | Some("aac") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("webm") => "audio/webm",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// Capture a file and upload it
async fn import_recording(
    file: &Path,
    duration: f64,
    content_type: Option<String>,
    no_upload: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;

    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read audio file: {}", file.display()))?;
    let content_type = content_type.unwrap_or_else(|| guess_content_type(file).to_string());
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());

    let recording = Recording::capture(filename, Payload::new(bytes, content_type), duration);
    store.put(&recording)?;
    println!("Captured {} ({}, {} bytes)", recording.id, recording.filename, recording.file_size);

    if no_upload || cfg.remote_url.is_none() {
        println!("Stored locally; it will upload on the next sync");
        return Ok(());
    }

    let coordinator = build_coordinator(cfg, Arc::clone(&store))?;
    let (handle, worker) = coordinator.spawn();
    handle
        .submit(SyncMessage::Upload {
            id: recording.id.clone(),
        })
        .await?;
    drain(&handle, worker).await?;

    match store.get_by_id(&recording.id)? {
        None => println!("Synced"),
        Some(r) => println!(
            "Status: {}{}",
            r.status,
            r.last_error.map(|e| format!(" ({})", e)).unwrap_or_default()
        ),
    }

    Ok(())
}

/// Show recording counts
fn show_status() -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let summary = store.summary()?;

    println!();
    println!("Recording Sync Status");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("Database: {}", cfg.database.display());
    println!();
    println!("Recordings:");
    println!("  Local:      {}", summary.local);
    println!("  Uploading:  {}", summary.uploading);
    println!("  Synced:     {}", summary.synced);
    println!("  Failed:     {}", summary.failed);
    println!("  Total:      {}", summary.total());
    println!();
    println!("Pending remote deletes: {}", summary.pending_deletes);

    if summary.failed > 0 {
        println!();
        println!("⚠️  {} failed recording(s). Use `voxsync retry <id>` to try again.", summary.failed);
    }

    Ok(())
}

/// List recordings in the local store
fn list_recordings(status: Option<StatusFilter>, limit: usize) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;

    let mut recordings = match status {
        Some(s) => store.get_by_status(&[s.into()])?,
        None => store.get_all()?,
    };
    recordings.truncate(limit);

    if recordings.is_empty() {
        println!("No recordings found");
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:<10} {:>8} {:<}",
        "ID", "FILENAME", "STATUS", "ATTEMPTS", "ERROR"
    );
    println!("{}", "-".repeat(100));

    for r in recordings {
        println!(
            "{:<38} {:<24} {:<10} {:>8} {:<}",
            r.id,
            truncate(&r.filename, 24),
            r.status,
            r.upload_attempts,
            r.last_error.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

/// Submit one message, wait for it, and exit
async fn submit_once(message: SyncMessage) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let coordinator = build_coordinator(cfg, Arc::clone(&store))?;
    let mut events = coordinator.subscribe();

    let (handle, worker) = coordinator.spawn();
    handle.submit(message).await?;
    drain(&handle, worker).await?;

    while let Ok(event) = events.try_recv() {
        print_event(&event.id, event.status, event.error.as_deref());
    }

    let summary = store.summary()?;
    if summary.pending_deletes > 0 {
        println!("{} remote delete(s) still pending", summary.pending_deletes);
    }

    Ok(())
}

/// Activation sweep only
async fn sync_once() -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let coordinator = build_coordinator(cfg, Arc::clone(&store))?;

    println!("🔄 Reconciling {}", cfg.database.display());
    let (handle, worker) = coordinator.spawn();
    drain(&handle, worker).await?;

    let summary = store.summary()?;
    println!(
        "Remaining: {} local, {} failed, {} pending delete(s)",
        summary.local + summary.uploading,
        summary.failed,
        summary.pending_deletes
    );

    Ok(())
}

/// Long-running coordinator
async fn run_coordinator() -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;
    let coordinator = build_coordinator(cfg, store)?;
    let mut events = coordinator.subscribe();

    println!("🔄 Syncing: {}", cfg.database.display());
    println!("    Press Ctrl+C to stop");
    println!();

    let (handle, worker) = coordinator.spawn();

    // Set up Ctrl+C handler
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = stop_tx.send(());
    });

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event.id, event.status, event.error.as_deref()),
                Err(RecvError::Lagged(missed)) => println!("⚠️  Missed {} status update(s)", missed),
                Err(RecvError::Closed) => break,
            },
            _ = &mut stop_rx => {
                println!();
                println!("🛑 Stopping sync worker...");
                handle.shutdown().await?;
                break;
            }
        }
    }

    worker.await.context("Sync worker panicked")?;
    Ok(())
}

fn print_event(id: &str, status: SyncStatus, error: Option<&str>) {
    let icon = match status {
        SyncStatus::Local => "📥",
        SyncStatus::Uploading => "⏫",
        SyncStatus::Synced => "✅",
        SyncStatus::Failed => "❌",
    };
    match error {
        Some(e) => println!("{} {} {} ({})", icon, id, status, e),
        None => println!("{} {} {}", icon, id, status),
    }
}

/// List what the metadata store has
async fn list_remote() -> Result<()> {
    let cfg = config::config()?;
    let base_url = cfg.require_remote_url()?;
    let metadata = HttpMetadataStore::new(base_url);

    let synced = metadata
        .list_synced()
        .await
        .with_context(|| format!("Failed to list recordings from {}", base_url))?;

    if synced.is_empty() {
        println!("No synced recordings");
        return Ok(());
    }

    println!("{:<38} {:<24} {:>10} {:<}", "ID", "FILENAME", "SIZE", "KEY");
    println!("{}", "-".repeat(100));
    for m in synced {
        println!(
            "{:<38} {:<24} {:>10} {:<}",
            m.id,
            truncate(&m.filename, 24),
            m.size,
            m.key.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;
    let policy = cfg.sync.retry_policy();
    let timeouts = cfg.sync.timeouts();

    println!("╔════════════════════════════════════════════════════════════════╗");
    println!("  voxsync Configuration");
    println!("╚════════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!();
    println!("Remote:");
    println!("  Base URL:  {}", cfg.remote_url.as_deref().unwrap_or("(not set)"));
    println!("  Probe URL: {}", cfg.effective_probe_url().unwrap_or("(not set)"));
    println!();
    println!("Sync:");
    println!("  Max attempts:   {}", policy.max_attempts);
    println!("  Base delay:     {}ms", policy.base_delay_ms);
    println!("  Probe interval: {}s", cfg.sync.probe_interval_secs);
    println!("  Queue capacity: {}", cfg.sync.queue_capacity);
    println!();
    println!("Timeouts:");
    println!("  Upload target:   {:?}", timeouts.upload_target);
    println!("  Object transfer: {:?}", timeouts.object_transfer);
    println!("  Metadata:        {:?}", timeouts.metadata);
    println!("  Delete:          {:?}", timeouts.delete);
    println!("  Probe:           {:?}", timeouts.probe);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("memo.m4a")), "audio/mp4");
        assert_eq!(guess_content_type(Path::new("MEMO.MP3")), "audio/mpeg");
        assert_eq!(guess_content_type(Path::new("a/b/take.opus")), "audio/ogg");
        assert_eq!(guess_content_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short.m4a", 24), "short.m4a");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }

    #[test]
    fn test_cli_parses_delete_with_key() {
        let cli = Cli::try_parse_from(["voxsync", "delete", "rec-1", "--key", "k/1"]).unwrap();
        match cli.command {
            Commands::Delete { id, key } => {
                assert_eq!(id, "rec-1");
                assert_eq!(key.as_deref(), Some("k/1"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_list_filter() {
        let cli = Cli::try_parse_from(["voxsync", "list", "--status", "failed", "-l", "5"]).unwrap();
        match cli.command {
            Commands::List { status, limit } => {
                assert_eq!(SyncStatus::from(status.unwrap()), SyncStatus::Failed);
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
