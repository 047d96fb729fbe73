//! Configuration module for FileBridge.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for FileBridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub instance: InstanceConfig,
    pub sync: SyncConfig,
    pub dispatcher: DispatcherConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Worker instance identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Name under which this worker registers. `None` uses the machine hostname.
    pub hostname: Option<String>,
}

/// Rule deciding whether a discovered file is eligible for transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Files modified at or after the endpoint's last sync.
    NewerThanRefreshDate,
    /// Files with no same-name, same-size counterpart on the opposite side.
    UniqueBySizeOnDisk,
    /// Files never recorded as transferred by this instance.
    UniqueBySizeInDatabase,
    /// Reserved; currently accepts every file.
    UniqueByChecksum,
    /// Every non-empty file.
    #[default]
    AllFiles,
}

impl SyncPolicy {
    /// True if the policy consults the transfer history
    pub fn requires_lookup(&self) -> bool {
        matches!(self, SyncPolicy::UniqueBySizeInDatabase)
    }
}

impl fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPolicy::NewerThanRefreshDate => "newer_than_refresh_date",
            SyncPolicy::UniqueBySizeOnDisk => "unique_by_size_on_disk",
            SyncPolicy::UniqueBySizeInDatabase => "unique_by_size_in_database",
            SyncPolicy::UniqueByChecksum => "unique_by_checksum",
            SyncPolicy::AllFiles => "all_files",
        };
        write!(f, "{}", s)
    }
}

/// Transfer settings shared by the dispatcher, sessions and hotfolders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// File qualification policy.
    pub policy: SyncPolicy,
    /// Compare sizes on the receiving side after each file.
    pub verify_after_transfer: bool,
    /// Seconds between hotfolder pump cycles.
    pub hotfolder_interval: u64,
    /// Upper bound in seconds for a single transport call. `None` disables it.
    pub operation_timeout_secs: Option<u64>,
}

impl SyncConfig {
    /// Hotfolder pump period
    pub fn hotfolder_period(&self) -> Duration {
        Duration::from_secs(self.hotfolder_interval)
    }

    /// Per-operation timeout, if configured
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

/// Scheduling loop timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Cooldown in seconds after the schedule source fails.
    pub error_backoff_secs: u64,
    /// Seconds to wait before re-polling an unchanged schedule item.
    pub refractory_secs: u64,
}

impl DispatcherConfig {
    /// Cooldown after a schedule read failure
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Re-poll interval for an unchanged item
    pub fn refractory(&self) -> Duration {
        Duration::from_secs(self.refractory_secs)
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/filebridge/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("filebridge")
            .join("config.yaml")
    }

    /// Name this worker registers under.
    pub fn instance_name(&self) -> String {
        self.instance
            .hostname
            .clone()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            policy: SyncPolicy::AllFiles,
            verify_after_transfer: true,
            hotfolder_interval: 10,
            operation_timeout_secs: None,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            error_backoff_secs: 600,
            refractory_secs: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("filebridge");
        Self {
            path: data_dir.join("filebridge.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.hotfolder_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- instance ---
        if let Some(hostname) = &self.instance.hostname {
            if hostname.trim().is_empty() {
                errors.push(ValidationError {
                    field: "instance.hostname".into(),
                    message: "must not be blank when set".into(),
                });
            }
        }

        // --- sync ---
        if self.sync.hotfolder_interval == 0 {
            errors.push(ValidationError {
                field: "sync.hotfolder_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.operation_timeout_secs == Some(0) {
            errors.push(ValidationError {
                field: "sync.operation_timeout_secs".into(),
                message: "must be greater than 0 when set".into(),
            });
        }

        // --- dispatcher ---
        if self.dispatcher.error_backoff_secs == 0 {
            errors.push(ValidationError {
                field: "dispatcher.error_backoff_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.dispatcher.refractory_secs == 0 {
            errors.push(ValidationError {
                field: "dispatcher.refractory_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- database ---
        if self.database.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "database.path".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use filebridge_core::config::{ConfigBuilder, SyncPolicy};
///
/// let config = ConfigBuilder::new()
///     .sync_policy(SyncPolicy::NewerThanRefreshDate)
///     .sync_hotfolder_interval(30)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- instance ---

    pub fn instance_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.instance.hostname = Some(hostname.into());
        self
    }

    // --- sync ---

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.config.sync.policy = policy;
        self
    }

    pub fn sync_verify_after_transfer(mut self, verify: bool) -> Self {
        self.config.sync.verify_after_transfer = verify;
        self
    }

    pub fn sync_hotfolder_interval(mut self, seconds: u64) -> Self {
        self.config.sync.hotfolder_interval = seconds;
        self
    }

    pub fn sync_operation_timeout_secs(mut self, seconds: Option<u64>) -> Self {
        self.config.sync.operation_timeout_secs = seconds;
        self
    }

    // --- dispatcher ---

    pub fn dispatcher_error_backoff_secs(mut self, seconds: u64) -> Self {
        self.config.dispatcher.error_backoff_secs = seconds;
        self
    }

    pub fn dispatcher_refractory_secs(mut self, seconds: u64) -> Self {
        self.config.dispatcher.refractory_secs = seconds;
        self
    }

    // --- database ---

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.database.path = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
