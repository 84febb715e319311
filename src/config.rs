//! Configuration schema and loader
//!
//! Loads configuration from:
//! 1. Default values
//! 2. The state-dir config file: ~/.backhaul/backhaul.toml
//! 3. An explicit path passed on the command line
//!
//! Later sources override earlier ones section by section.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{BackhaulError, Result};

/// Main Backhaul configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackhaulConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Schedule evaluator configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Retention sweeper configuration
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path (relative to ~/.backhaul or absolute)
    pub path: String,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "backhaul.db".to_string(),
            max_connections: default_max_connections(),
        }
    }
}

/// Schedule evaluator and watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between evaluator ticks
    pub tick_interval_secs: u64,

    /// Seconds a pending attempt may sit without a live queue entry before
    /// the watchdog re-enqueues it
    pub pending_timeout_secs: u64,

    /// Seconds an in-progress attempt may run before the watchdog fails it
    /// as timed out (should exceed the worker execution timeout)
    pub in_progress_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            pending_timeout_secs: 600,
            in_progress_timeout_secs: 7200,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks
    pub count: usize,

    /// Seconds between queue polls when the queue is empty
    pub poll_interval_secs: u64,

    /// Queue lease duration in seconds (visibility timeout)
    pub lease_secs: u64,

    /// Seconds a single dump execution may take
    pub execution_timeout_secs: u64,

    /// Seconds a single artifact upload may take
    pub upload_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 2,
            poll_interval_secs: 5,
            lease_secs: 3600,
            execution_timeout_secs: 1800,
            upload_timeout_secs: 600,
        }
    }
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the filesystem backend (relative to ~/.backhaul
    /// or absolute)
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "artifacts".to_string(),
        }
    }
}

/// Retention sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Seconds between retention sweeps
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "backhaul=info".to_string(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

impl BackhaulConfig {
    /// State directory holding the default database, storage root, and config
    pub fn state_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".backhaul")
    }

    /// Default config file path (~/.backhaul/backhaul.toml)
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("backhaul.toml")
    }

    /// Resolve the database path against the state directory
    pub fn database_path(&self) -> PathBuf {
        resolve_against_state_dir(&self.database.path)
    }

    /// Resolve the storage root against the state directory
    pub fn storage_root(&self) -> PathBuf {
        resolve_against_state_dir(&self.storage.root)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.workers.poll_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_secs)
    }
}

fn resolve_against_state_dir(path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        BackhaulConfig::state_dir().join(path)
    }
}

/// Configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Loader over the default config location
    pub fn new() -> Self {
        Self {
            config_path: BackhaulConfig::default_path(),
        }
    }

    /// Loader over an explicit config path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub async fn load(&self) -> Result<BackhaulConfig> {
        if !self.config_path.exists() {
            debug!(
                path = %self.config_path.display(),
                "Config file not found, using defaults"
            );
            return Ok(BackhaulConfig::default());
        }

        let config = self.load_from_path(&self.config_path).await?;
        info!(path = %self.config_path.display(), "Configuration loaded");
        Ok(config)
    }

    async fn load_from_path(&self, path: &Path) -> Result<BackhaulConfig> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| BackhaulError::Config(format!("Failed to read config: {}", e)))?;

        let config: BackhaulConfig = toml::from_str(&content)
            .map_err(|e| BackhaulError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
