//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/actilyze/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/actilyze/` (~/.config/actilyze/)
//! - Data: `$XDG_DATA_HOME/actilyze/` (~/.local/share/actilyze/)
//! - State/Logs: `$XDG_STATE_HOME/actilyze/` (~/.local/state/actilyze/actilyze.YYYY-MM-DD.log)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Log files are named `<prefix>.<date>.<suffix>`.
pub(crate) const LOG_FILE_PREFIX: &str = "actilyze";
pub(crate) const LOG_FILE_SUFFIX: &str = "log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Interpreter and analysis script settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Duration estimate settings
    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// Result ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Interpreter and analysis script configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Explicit interpreter path, tried before persisted state and discovery
    pub interpreter: Option<PathBuf>,

    /// Analysis script handed to the interpreter
    pub script: Option<PathBuf>,

    /// Seconds to wait for `Rscript --version` before giving up on a candidate
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            script: None,
            validation_timeout_secs: default_validation_timeout(),
        }
    }
}

fn default_validation_timeout() -> u64 {
    10
}

/// Duration estimator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EstimatorConfig {
    /// Throughput of the analysis on the reference machine, in MB/s
    #[serde(default = "default_baseline_mb_per_sec")]
    pub baseline_mb_per_sec: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            baseline_mb_per_sec: default_baseline_mb_per_sec(),
        }
    }
}

fn default_baseline_mb_per_sec() -> f64 {
    0.5
}

/// Result ingestion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Delete a CSV file that fails to parse
    #[serde(default = "default_delete_corrupt_files")]
    pub delete_corrupt_files: bool,

    /// Sort ingested snapshots by name instead of filesystem order
    #[serde(default)]
    pub sort_by_name: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            delete_corrupt_files: default_delete_corrupt_files(),
            sort_by_name: false,
        }
    }
}

fn default_delete_corrupt_files() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the estimator and runner cannot work with.
    pub fn validate(&self) -> Result<()> {
        let baseline = self.estimator.baseline_mb_per_sec;
        if !baseline.is_finite() || baseline <= 0.0 {
            return Err(Error::Config(
                "estimator.baseline_mb_per_sec must be a positive number".to_string(),
            ));
        }
        if self.runtime.validation_timeout_secs == 0 {
            return Err(Error::Config(
                "runtime.validation_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/actilyze/config.toml` (~/.config/actilyze/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("actilyze").join("config.toml")
    }

    /// Returns the data directory path (for persisted runtime state)
    ///
    /// `$XDG_DATA_HOME/actilyze/` (~/.local/share/actilyze/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("actilyze")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/actilyze/` (~/.local/state/actilyze/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("actilyze")
    }

    /// Returns the file holding the last validated interpreter path
    ///
    /// `$XDG_DATA_HOME/actilyze/runtime_path`
    pub fn runtime_state_path() -> PathBuf {
        Self::data_dir().join("runtime_path")
    }

    /// Returns today's log file path
    ///
    /// Logs rotate daily (UTC), one file per day:
    /// `$XDG_STATE_HOME/actilyze/actilyze.YYYY-MM-DD.log`
    pub fn log_path() -> PathBuf {
        Self::log_path_for(chrono::Utc::now().date_naive())
    }

    /// Returns the log file written on `date`
    pub fn log_path_for(date: chrono::NaiveDate) -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
