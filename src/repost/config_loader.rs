//! Configuration loading and live reloading for the repost detector
//!
//! This module provides functionality for:
//! 1. Parsing `bot.toml` into strongly typed connection settings and a runtime snapshot
//! 2. Failing fast (with every missing field listed) when connection fields are absent
//! 3. Watching the file and atomically swapping in a new `RuntimeConfig` when it changes

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::repost::supervisor::ShutdownSignal;

/// How often the modification time is polled in addition to filesystem events.
pub const MTIME_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bot.toml";

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "REPOST_BOT_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Config is missing required values: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which stored fingerprint width the matcher compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum HashSize {
    Hash16,
    Hash64,
    Hash256,
}

impl HashSize {
    /// Length of the hex string.
    pub fn hex_len(self) -> usize {
        match self {
            HashSize::Hash16 => 16,
            HashSize::Hash64 => 64,
            HashSize::Hash256 => 256,
        }
    }
}

impl TryFrom<u32> for HashSize {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            16 => Ok(HashSize::Hash16),
            64 => Ok(HashSize::Hash64),
            256 => Ok(HashSize::Hash256),
            other => Err(format!("expected 16, 64 or 256, got {}", other)),
        }
    }
}

impl From<HashSize> for u32 {
    fn from(size: HashSize) -> Self {
        size.hex_len() as u32
    }
}

impl std::fmt::Display for HashSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hash{}", self.hex_len())
    }
}

/// Feed/action provider connection settings. Read once at startup.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: String,
    pub base_url: String,
    pub section: String,
    pub sort: String,
    pub request_timeout: Duration,
}

/// Durable store backend selection. Read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Document,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "document" | "jsonl" => Ok(StoreBackend::Document),
            other => Err(ConfigError::Invalid {
                key: "store.backend",
                reason: format!("unknown backend '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
    pub log_format: String,
    pub log_directory: String,
    pub log_to_file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            log_directory: "./logs".to_string(),
            log_to_file: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSettings {
    pub enabled: bool,
    pub depth: u32,
    pub start_page: u32,
}

/// Immutable snapshot of every live tunable.
///
/// Consumers hold an `Arc<RuntimeConfig>` and re-read the manager at their
/// next natural boundary; a snapshot is never modified after it is published.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub version: u64,
    pub leave_comment: bool,
    pub leave_downvote: bool,
    pub flush_interval: Duration,
    pub comment_template: String,
    pub hash_size: HashSize,
    pub hamming_cutoff: u32,
    pub min_request_delay: Duration,
    pub log_reposts: bool,
    pub repost_log_path: PathBuf,
    pub backfill: BackfillSettings,
    pub match_worker_count: usize,
    pub title_exclusion_terms: Vec<String>,
    pub retry_interval: Duration,
    pub status_interval_cycles: u32,
    pub match_queue_capacity: usize,
    pub record_capacity_warning: usize,
    pub failed_action_warning: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: 1,
            leave_comment: false,
            leave_downvote: false,
            flush_interval: Duration::from_secs(20),
            comment_template: "We Have Detected Reposted Content. Matches: {} Reference Hash: {}"
                .to_string(),
            hash_size: HashSize::Hash16,
            hamming_cutoff: 3,
            min_request_delay: Duration::from_secs(5),
            log_reposts: false,
            repost_log_path: PathBuf::from("repost.log"),
            backfill: BackfillSettings {
                enabled: false,
                depth: 500,
                start_page: 1,
            },
            match_worker_count: num_cpus::get().clamp(1, 5),
            title_exclusion_terms: vec!["mrw".to_string(), "when".to_string(), "my reaction".to_string()],
            retry_interval: Duration::from_secs(30),
            status_interval_cycles: 10,
            match_queue_capacity: 1024,
            record_capacity_warning: 5_000_000,
            failed_action_warning: 500,
        }
    }
}

impl RuntimeConfig {
    /// Build a snapshot from the `[options]` table, falling back to defaults per key.
    pub fn from_options(options: &OptionsSection, version: u64) -> ConfigResult<Self> {
        let defaults = RuntimeConfig::default();

        let hash_size = match options.hash_size {
            Some(raw) => HashSize::try_from(raw)
                .map_err(|reason| ConfigError::Invalid { key: "hash_size", reason })?,
            None => defaults.hash_size,
        };

        let match_worker_count = options.match_worker_count.unwrap_or(defaults.match_worker_count);
        if match_worker_count == 0 {
            return Err(ConfigError::Invalid {
                key: "match_worker_count",
                reason: "must be at least 1".to_string(),
            });
        }

        let flush_interval_secs = options
            .flush_interval_secs
            .unwrap_or(defaults.flush_interval.as_secs());
        if flush_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "flush_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        let match_queue_capacity = options
            .match_queue_capacity
            .unwrap_or(defaults.match_queue_capacity)
            .max(1);

        Ok(Self {
            version,
            leave_comment: options.leave_comment.unwrap_or(defaults.leave_comment),
            leave_downvote: options.leave_downvote.unwrap_or(defaults.leave_downvote),
            flush_interval: Duration::from_secs(flush_interval_secs),
            comment_template: options
                .comment_template
                .clone()
                .unwrap_or(defaults.comment_template),
            hash_size,
            hamming_cutoff: options.hamming_cutoff.unwrap_or(defaults.hamming_cutoff),
            min_request_delay: options
                .min_request_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.min_request_delay),
            log_reposts: options.log_reposts.unwrap_or(defaults.log_reposts),
            repost_log_path: options
                .repost_log_path
                .clone()
                .map(PathBuf::from)
                .unwrap_or(defaults.repost_log_path),
            backfill: BackfillSettings {
                enabled: options.backfill_enabled.unwrap_or(defaults.backfill.enabled),
                depth: options.backfill_depth.unwrap_or(defaults.backfill.depth),
                start_page: options
                    .backfill_start_page
                    .unwrap_or(defaults.backfill.start_page)
                    .max(1),
            },
            match_worker_count,
            title_exclusion_terms: options
                .title_exclusion_terms
                .as_deref()
                .map(parse_exclusion_terms)
                .unwrap_or(defaults.title_exclusion_terms),
            retry_interval: options
                .retry_interval_secs
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or(defaults.retry_interval),
            status_interval_cycles: options
                .status_interval_cycles
                .unwrap_or(defaults.status_interval_cycles)
                .max(1),
            match_queue_capacity,
            record_capacity_warning: options
                .record_capacity_warning
                .unwrap_or(defaults.record_capacity_warning),
            failed_action_warning: options
                .failed_action_warning
                .unwrap_or(defaults.failed_action_warning),
        })
    }
}

/// Split a comma separated list into trimmed, lower-cased, non-empty terms.
pub fn parse_exclusion_terms(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty())
        .collect()
}

/// The recognised `[options]` keys. Every key is optional.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsSection {
    pub leave_comment: Option<bool>,
    pub leave_downvote: Option<bool>,
    pub flush_interval_secs: Option<u64>,
    pub comment_template: Option<String>,
    pub hash_size: Option<u32>,
    pub hamming_cutoff: Option<u32>,
    pub min_request_delay_secs: Option<u64>,
    pub log_reposts: Option<bool>,
    pub repost_log_path: Option<String>,
    pub backfill_enabled: Option<bool>,
    pub backfill_depth: Option<u32>,
    pub backfill_start_page: Option<u32>,
    pub match_worker_count: Option<usize>,
    pub title_exclusion_terms: Option<String>,
    pub retry_interval_secs: Option<u64>,
    pub status_interval_cycles: Option<u32>,
    pub match_queue_capacity: Option<usize>,
    pub record_capacity_warning: Option<usize>,
    pub failed_action_warning: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFeedSection {
    client_id: Option<String>,
    client_secret: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    base_url: Option<String>,
    section: Option<String>,
    sort: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStoreSection {
    backend: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfigFile {
    feed: RawFeedSection,
    store: RawStoreSection,
    logging: LoggingSettings,
    options: OptionsSection,
}

/// Settings that are only read at startup.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub feed: FeedSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

fn required(value: &Option<String>, name: &str, missing: &mut Vec<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            missing.push(name.to_string());
            String::new()
        }
    }
}

impl ConnectionSettings {
    fn from_raw(raw: &RawConfigFile) -> ConfigResult<Self> {
        let mut missing = Vec::new();

        let client_id = required(&raw.feed.client_id, "feed.client_id", &mut missing);
        let client_secret = required(&raw.feed.client_secret, "feed.client_secret", &mut missing);
        let access_token = required(&raw.feed.access_token, "feed.access_token", &mut missing);
        let refresh_token = required(&raw.feed.refresh_token, "feed.refresh_token", &mut missing);
        let backend = required(&raw.store.backend, "store.backend", &mut missing);
        let path = required(&raw.store.path, "store.path", &mut missing);

        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }

        Ok(Self {
            feed: FeedSettings {
                client_id,
                client_secret,
                access_token,
                refresh_token,
                base_url: raw
                    .feed
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.imgur.com/3".to_string()),
                section: raw.feed.section.clone().unwrap_or_else(|| "user".to_string()),
                sort: raw.feed.sort.clone().unwrap_or_else(|| "time".to_string()),
                request_timeout: Duration::from_secs(raw.feed.request_timeout_secs.unwrap_or(60)),
            },
            store: StoreSettings {
                backend: backend.parse()?,
                path: PathBuf::from(path),
            },
            logging: raw.logging.clone(),
        })
    }
}

/// Event broadcast after a new runtime snapshot has been published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigReloadEvent {
    pub version: u64,
}

/// Owns the config file, the startup settings and the live runtime snapshot.
pub struct ConfigManager {
    config_path: PathBuf,
    connection: ConnectionSettings,
    runtime: RwLock<Arc<RuntimeConfig>>,
    last_modified: Mutex<Option<SystemTime>>,
    reload_tx: broadcast::Sender<ConfigReloadEvent>,
}

impl ConfigManager {
    /// Load and validate the config file. Any error here is fatal for the process.
    pub fn load(config_path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.display().to_string()));
        }

        let raw = Self::read_raw(&config_path)?;
        let connection = ConnectionSettings::from_raw(&raw)?;
        let runtime = RuntimeConfig::from_options(&raw.options, 1)?;
        let modified = fs::metadata(&config_path)?.modified().ok();

        info!(
            path = %config_path.display(),
            backend = ?connection.store.backend,
            "Loaded configuration"
        );

        let manager = Self::from_parts(config_path, connection, runtime);
        *manager.last_modified.lock() = modified;
        Ok(manager)
    }

    /// Build a manager from already validated parts.
    pub fn from_parts(
        config_path: PathBuf,
        connection: ConnectionSettings,
        runtime: RuntimeConfig,
    ) -> Self {
        let (reload_tx, _) = broadcast::channel(16);
        Self {
            config_path,
            connection,
            runtime: RwLock::new(Arc::new(runtime)),
            last_modified: Mutex::new(None),
            reload_tx,
        }
    }

    fn read_raw(path: &Path) -> ConfigResult<RawConfigFile> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Resolve the config path from the environment or the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn connection(&self) -> &ConnectionSettings {
        &self.connection
    }

    /// The latest published snapshot.
    pub fn current(&self) -> Arc<RuntimeConfig> {
        self.runtime.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigReloadEvent> {
        self.reload_tx.subscribe()
    }

    /// Publish a new snapshot, stamping it with the next version.
    pub fn replace(&self, mut next: RuntimeConfig) -> Arc<RuntimeConfig> {
        let published = {
            let mut runtime = self.runtime.write();
            next.version = runtime.version + 1;
            let published = Arc::new(next);
            *runtime = published.clone();
            published
        };

        let _ = self.reload_tx.send(ConfigReloadEvent {
            version: published.version,
        });
        published
    }

    /// Reload the runtime options if the file's modification time moved forward.
    ///
    /// Returns `Ok(true)` when a new snapshot was published. On a parse or
    /// validation error the current snapshot stays live, and the same file
    /// version is not retried until it changes again.
    pub fn reload_if_modified(&self) -> ConfigResult<bool> {
        let modified = fs::metadata(&self.config_path)?.modified()?;
        {
            let mut last = self.last_modified.lock();
            if matches!(*last, Some(previous) if modified <= previous) {
                return Ok(false);
            }
            *last = Some(modified);
        }

        let raw = Self::read_raw(&self.config_path)?;
        let next = RuntimeConfig::from_options(&raw.options, 0)?;

        let published = self.replace(next);
        info!(version = published.version, "Config changes detected, reloaded options");
        Ok(true)
    }

    /// Long-running watcher: filesystem events plus a periodic mtime poll.
    pub async fn watch(self: Arc<Self>, mut shutdown: ShutdownSignal) -> ConfigResult<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let watch_dir = match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let _watcher = match RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.send(res);
            },
            Config::default(),
        )
        .and_then(|mut watcher| {
            watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        }) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("File watcher unavailable, falling back to polling: {}", e);
                None
            }
        };

        let file_name = self.config_path.file_name().map(|name| name.to_os_string());
        let mut ticker = tokio::time::interval(MTIME_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(path = %self.config_path.display(), "Config watcher started");

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Config watcher received shutdown signal");
                    return Ok(());
                }
                Some(res) = event_rx.recv() => {
                    match res {
                        Ok(Event { kind: EventKind::Modify(_) | EventKind::Create(_), paths, .. }) => {
                            let touches_config = paths
                                .iter()
                                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                            if touches_config {
                                self.try_reload();
                            }
                        }
                        Ok(_) => {}
                        Err(e) => error!("Watch error: {}", e),
                    }
                }
                _ = ticker.tick() => self.try_reload(),
            }
        }
    }

    fn try_reload(&self) {
        match self.reload_if_modified() {
            Ok(true) => {}
            Ok(false) => debug!("Config unchanged"),
            Err(e) => error!("Failed to reload config, keeping current options: {}", e),
        }
    }
}

#[cfg(test)]
impl ConfigManager {
    /// In-memory manager for component tests.
    pub(crate) fn for_tests(runtime: RuntimeConfig) -> Self {
        let connection = ConnectionSettings {
            feed: FeedSettings {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
                base_url: "http://127.0.0.1:9".to_string(),
                section: "user".to_string(),
                sort: "time".to_string(),
                request_timeout: Duration::from_secs(1),
            },
            store: StoreSettings {
                backend: StoreBackend::Sqlite,
                path: PathBuf::from(":memory:"),
            },
            logging: LoggingSettings::default(),
        };
        Self::from_parts(PathBuf::from("bot.toml"), connection, runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"
[feed]
client_id = "id"
client_secret = "secret"
access_token = "access"
refresh_token = "refresh"

[store]
backend = "sqlite"
path = "./reposts.sqlite"

[options]
hash_size = 64
hamming_cutoff = 4
title_exclusion_terms = " MRW , When,, My Reaction "
match_worker_count = 2
"#;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("bot.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), VALID);

        let manager = ConfigManager::load(&path).unwrap();
        let runtime = manager.current();

        assert_eq!(runtime.version, 1);
        assert_eq!(runtime.hash_size, HashSize::Hash64);
        assert_eq!(runtime.hamming_cutoff, 4);
        assert_eq!(runtime.match_worker_count, 2);
        assert_eq!(runtime.title_exclusion_terms, vec!["mrw", "when", "my reaction"]);
        assert_eq!(manager.connection().store.backend, StoreBackend::Sqlite);
        assert_eq!(manager.connection().feed.section, "user");
    }

    #[test]
    fn test_missing_fields_are_all_listed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "[feed]\nclient_id = \"id\"\naccess_token = \"\"\n[store]\nbackend = \"sqlite\"\n",
        );

        match ConfigManager::load(&path) {
            Err(ConfigError::MissingFields(fields)) => {
                assert_eq!(
                    fields,
                    vec![
                        "feed.client_secret",
                        "feed.access_token",
                        "feed.refresh_token",
                        "store.path"
                    ]
                );
            }
            other => panic!("expected missing fields, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_hash_size_rejected() {
        let options = OptionsSection {
            hash_size: Some(32),
            ..Default::default()
        };
        assert!(matches!(
            RuntimeConfig::from_options(&options, 1),
            Err(ConfigError::Invalid { key: "hash_size", .. })
        ));
    }

    #[test]
    fn test_replace_bumps_version_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), VALID);
        let manager = ConfigManager::load(&path).unwrap();
        let mut rx = manager.subscribe();

        let mut next = (*manager.current()).clone();
        next.hamming_cutoff = 9;
        let published = manager.replace(next);

        assert_eq!(published.version, 2);
        assert_eq!(manager.current().hamming_cutoff, 9);
        assert_eq!(rx.try_recv().unwrap(), ConfigReloadEvent { version: 2 });
    }

    #[test]
    fn test_reload_only_when_modified() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), VALID);
        let manager = ConfigManager::load(&path).unwrap();

        assert!(!manager.reload_if_modified().unwrap());

        let updated = VALID.replace("hamming_cutoff = 4", "hamming_cutoff = 7");
        write_config(dir.path(), &updated);
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(manager.reload_if_modified().unwrap());
        assert_eq!(manager.current().hamming_cutoff, 7);
        assert_eq!(manager.current().version, 2);
        assert!(!manager.reload_if_modified().unwrap());
    }

    #[test]
    fn test_bad_reload_keeps_current_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), VALID);
        let manager = ConfigManager::load(&path).unwrap();

        write_config(dir.path(), &VALID.replace("hash_size = 64", "hash_size = 12"));
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(manager.reload_if_modified().is_err());
        assert_eq!(manager.current().hash_size, HashSize::Hash64);
        assert_eq!(manager.current().version, 1);

        // The broken version is reported once, not on every poll.
        assert!(!manager.reload_if_modified().unwrap());

        write_config(dir.path(), &VALID.replace("hash_size = 64", "hash_size = 256"));
        let fixed = later + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(fixed)
            .unwrap();

        assert!(manager.reload_if_modified().unwrap());
        assert_eq!(manager.current().hash_size, HashSize::Hash256);
        assert_eq!(manager.current().version, 2);
    }
}
