//! Configuration for voxsync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VOXSYNC_HOME, VOXSYNC_REMOTE_URL, VOXSYNC_PROBE_URL)
//! 2. Config file (.voxsync/config.yaml)
//! 3. Defaults (~/.voxsync)
//!
//! Config file discovery:
//! - Searches current directory and parents for .voxsync/config.yaml
//! - Paths in config file are relative to the .voxsync/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::core::coordinator::SyncOptions;
use crate::core::{RequestTimeouts, RetryPolicy};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_DATABASE: &str = "voxsync.db";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .voxsync/)
    pub home: Option<String>,
    /// Database file (relative to home)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfig {
    /// Metadata API base URL
    pub base_url: Option<String>,
    /// Reachability probe URL (defaults to the base URL)
    pub probe_url: Option<String>,
}

/// Sync tunables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_probe_interval_secs() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            queue_capacity: default_queue_capacity(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

/// Per-call timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub upload_target_secs: u64,
    pub object_transfer_secs: u64,
    pub metadata_secs: u64,
    pub delete_secs: u64,
    pub probe_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            upload_target_secs: 15,
            object_transfer_secs: 120,
            metadata_secs: 15,
            delete_secs: 15,
            probe_secs: 5,
        }
    }
}

impl From<&TimeoutSettings> for RequestTimeouts {
    fn from(t: &TimeoutSettings) -> Self {
        Self {
            upload_target: Duration::from_secs(t.upload_target_secs),
            object_transfer: Duration::from_secs(t.object_transfer_secs),
            metadata: Duration::from_secs(t.metadata_secs),
            delete: Duration::from_secs(t.delete_secs),
            probe: Duration::from_secs(t.probe_secs),
        }
    }
}

impl SyncSettings {
    /// Reject values that would spin or fail every upload without trying
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_attempts >= 1, "sync.max_attempts must be at least 1");
        ensure!(
            self.probe_interval_secs >= 1,
            "sync.probe_interval_secs must be at least 1"
        );
        ensure!(self.queue_capacity >= 1, "sync.queue_capacity must be at least 1");

        let t = &self.timeouts;
        for (name, secs) in [
            ("upload_target_secs", t.upload_target_secs),
            ("object_transfer_secs", t.object_transfer_secs),
            ("metadata_secs", t.metadata_secs),
            ("delete_secs", t.delete_secs),
            ("probe_secs", t.probe_secs),
        ] {
            ensure!(secs > 0, "sync.timeouts.{} must be greater than 0", name);
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            ..RetryPolicy::default()
        }
    }

    pub fn timeouts(&self) -> RequestTimeouts {
        RequestTimeouts::from(&self.timeouts)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            policy: self.retry_policy(),
            timeouts: self.timeouts(),
            queue_capacity: self.queue_capacity,
            ..SyncOptions::default()
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Local store database file
    pub database: PathBuf,
    /// Metadata API base URL, if configured
    pub remote_url: Option<String>,
    /// Reachability probe URL, if configured
    pub probe_url: Option<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub sync: SyncSettings,
}

impl ResolvedConfig {
    /// Probe URL, falling back to the remote base URL
    pub fn effective_probe_url(&self) -> Option<&str> {
        self.probe_url.as_deref().or(self.remote_url.as_deref())
    }

    /// Remote base URL, or an error telling the user how to set it
    pub fn require_remote_url(&self) -> Result<&str> {
        self.remote_url.as_deref().context(
            "No remote configured. Set VOXSYNC_REMOTE_URL or remote.base_url in .voxsync/config.yaml",
        )
    }
}

/// Environment overrides, captured once so resolution stays pure
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<String>,
    remote_url: Option<String>,
    probe_url: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var("VOXSYNC_HOME").ok(),
            remote_url: std::env::var("VOXSYNC_REMOTE_URL").ok(),
            probe_url: std::env::var("VOXSYNC_PROBE_URL").ok(),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".voxsync").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn resolve(
    config_file: Option<PathBuf>,
    env: EnvOverrides,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let file = config_file.as_deref().map(load_config_file).transpose()?;

    let home = if let Some(env_home) = env.home {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home)) = (
        config_file.as_deref(),
        file.as_ref().and_then(|f| f.paths.home.as_deref()),
    ) {
        let voxsync_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(voxsync_dir, home)
    } else {
        default_home
    };

    let database = file
        .as_ref()
        .and_then(|f| f.paths.database.as_deref())
        .map(|db| resolve_path(&home, db))
        .unwrap_or_else(|| home.join(DEFAULT_DATABASE));

    let (remote, sync) = match file {
        Some(f) => (f.remote, f.sync),
        None => (RemoteConfig::default(), SyncSettings::default()),
    };
    if let Some(path) = config_file.as_deref() {
        sync.validate()
            .with_context(|| format!("Invalid sync settings in {}", path.display()))?;
    }

    Ok(ResolvedConfig {
        home,
        database,
        remote_url: env.remote_url.or(remote.base_url),
        probe_url: env.probe_url.or(remote.probe_url),
        config_file,
        sync,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".voxsync");

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    resolve(find_config_file(&cwd), EnvOverrides::from_env(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
