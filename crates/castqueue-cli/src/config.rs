//! Configuration file management for castqueue.
//!
//! Provides a TOML-based config file at `~/.config/castqueue/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default, for
//! every knob in spec.md §6's Configuration list.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use castqueue_core::backoff::BackoffConfig;
use castqueue_core::classify::ClassifyConfig;
use castqueue_core::worker::WorkerConfig;
use castqueue_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub backoff: BackoffSection,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    pub max_retries: i32,
    pub orphan_staleness_seconds: u64,
    pub worker_idle_sleep_ms: u64,
    pub completed_retention_days: u32,
    pub progress_subscriber_buffer: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_retries: castqueue_core::command::DEFAULT_MAX_RETRIES,
            orphan_staleness_seconds: 300,
            worker_idle_sleep_ms: 1000,
            completed_retention_days: 7,
            progress_subscriber_buffer: castqueue_core::progress::DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSection {
    pub base_seconds: u64,
    pub multiplier: f64,
    pub cap_seconds: u64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        let default = BackoffConfig::default();
        Self {
            base_seconds: default.base.as_secs(),
            multiplier: default.multiplier,
            cap_seconds: default.max.as_secs(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the castqueue config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/castqueue` or
/// `~/.config/castqueue`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("castqueue");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("castqueue")
}

/// Return the path to the castqueue config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CastqueueConfig {
    pub db_config: DbConfig,
    pub max_retries: i32,
    pub backoff: BackoffConfig,
    pub orphan_staleness: Duration,
    pub worker_idle_sleep: Duration,
    pub progress_subscriber_buffer: usize,
}

impl CastqueueConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// Only `database.url` participates in the CLI-flag step; the rest are
    /// operational tuning knobs with no dedicated flags, resolved from the
    /// config file (falling back to spec defaults).
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("CASTQUEUE_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let queue = file_config
            .as_ref()
            .map(|c| &c.queue)
            .cloned_or_default();
        let backoff = file_config
            .as_ref()
            .map(|c| &c.backoff)
            .cloned_or_default();

        Ok(Self {
            db_config,
            max_retries: queue.max_retries,
            backoff: BackoffConfig {
                base: Duration::from_secs(backoff.base_seconds),
                multiplier: backoff.multiplier,
                max: Duration::from_secs(backoff.cap_seconds),
            },
            orphan_staleness: Duration::from_secs(queue.orphan_staleness_seconds),
            worker_idle_sleep: Duration::from_millis(queue.worker_idle_sleep_ms),
            progress_subscriber_buffer: queue.progress_subscriber_buffer,
        })
    }

    /// Build a [`WorkerConfig`] from the resolved tuning knobs, using the
    /// default error-classification rules (no per-deployment override in
    /// scope).
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            backoff: self.backoff,
            classify: ClassifyConfig::default(),
            orphan_staleness: self.orphan_staleness,
            idle_sleep: self.worker_idle_sleep,
        }
    }
}

/// Small helper so `resolve` can fall back to `T::default()` without an
/// extra `match` at each call site.
trait ClonedOrDefault<T> {
    fn cloned_or_default(self) -> T;
}

impl<T: Clone + Default> ClonedOrDefault<T> for Option<&T> {
    fn cloned_or_default(self) -> T {
        self.cloned().unwrap_or_default()
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
