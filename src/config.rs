//! Configuration file parser for `engblogs.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::crawl::{RecencyWindow, DEFAULT_CONCURRENCY_CAP};
use crate::feed::FetchSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings for all subcommands. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed directory: a local OPML path or an http(s) URL.
    pub directory: String,

    /// SQLite file backing the dedup store.
    pub database_path: String,

    /// Where `build` writes the listing.
    pub output_dir: String,

    /// Sources crawled at once.
    pub concurrency_cap: usize,

    pub crawl_window_days: i64,

    pub repair_window_days: i64,

    pub repair_concurrency_cap: usize,

    pub connect_timeout_secs: u64,

    pub read_timeout_secs: u64,

    pub user_agent: String,

    /// Serialize all store writes of a run behind one lock.
    pub serialize_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchSettings::default();
        Self {
            directory: "engblogs.opml".to_string(),
            database_path: "engblogs.db".to_string(),
            output_dir: "public".to_string(),
            concurrency_cap: DEFAULT_CONCURRENCY_CAP,
            crawl_window_days: RecencyWindow::CRAWL_DAYS,
            repair_window_days: RecencyWindow::REPAIR_DAYS,
            repair_concurrency_cap: crate::crawl::repair::DEFAULT_REPAIR_CONCURRENCY,
            connect_timeout_secs: fetch.connect_timeout.as_secs(),
            read_timeout_secs: fetch.read_timeout.as_secs(),
            user_agent: fetch.user_agent,
            serialize_writes: true,
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "directory",
    "database_path",
    "output_dir",
    "concurrency_cap",
    "crawl_window_days",
    "repair_window_days",
    "repair_concurrency_cap",
    "connect_timeout_secs",
    "read_timeout_secs",
    "user_agent",
    "serialize_writes",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing or blank file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Zero or out-of-range caps, windows or timeouts → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let config = Self::from_toml(&content)?;
        tracing::info!(path = %path.display(), directory = %config.directory, "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("concurrency_cap", self.concurrency_cap, MAX_CONCURRENCY)?;
        check_range("repair_concurrency_cap", self.repair_concurrency_cap, MAX_CONCURRENCY)?;
        check_range("crawl_window_days", self.crawl_window_days, MAX_WINDOW_DAYS)?;
        check_range("repair_window_days", self.repair_window_days, MAX_WINDOW_DAYS)?;
        check_range("connect_timeout_secs", self.connect_timeout_secs, MAX_TIMEOUT_SECS)?;
        check_range("read_timeout_secs", self.read_timeout_secs, MAX_TIMEOUT_SECS)?;

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "user_agent",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn crawl_window(&self) -> Result<RecencyWindow, ConfigError> {
        window("crawl_window_days", self.crawl_window_days)
    }

    pub fn repair_window(&self) -> Result<RecencyWindow, ConfigError> {
        window("repair_window_days", self.repair_window_days)
    }
}

const MAX_CONCURRENCY: i64 = 1024;
const MAX_WINDOW_DAYS: i64 = 365;
const MAX_TIMEOUT_SECS: i64 = 3600;

/// `value` must lie in `1..=max`. Values too large for an `i64` are out of
/// range too.
fn check_range<T>(key: &'static str, value: T, max: i64) -> Result<(), ConfigError>
where
    T: TryInto<i64> + std::fmt::Display + Copy,
{
    match value.try_into() {
        Ok(v) if (1..=max).contains(&v) => Ok(()),
        _ => Err(ConfigError::Invalid {
            key,
            reason: format!("must be between 1 and {max}, got {value}"),
        }),
    }
}

fn window(key: &'static str, days: i64) -> Result<RecencyWindow, ConfigError> {
    RecencyWindow::try_days(days).ok_or_else(|| ConfigError::Invalid {
        key,
        reason: format!("{days} days is out of range"),
    })
}

// ============================================================================
// Tests
// ============================================================================
