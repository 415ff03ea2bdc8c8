//! Configuration management for fastfish.
//!
//! Configuration is read from `~/.config/fastfish/config.toml` at startup
//! (or the path given with `--config`). If the file doesn't exist, a default
//! configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::allocation::DEFAULT_LEASE_TTL_SECS;
use crate::domain::{LexiconCategory, RecencyWindow};
use crate::fetcher::http_fetcher::DEFAULT_API_BASE;
use crate::fetcher::parallel::{DEFAULT_LIMIT_PER_SOURCE, DEFAULT_WORKERS};
use crate::lexicon::ScreeningPolicy;
use crate::push::notifier::DEFAULT_TELEGRAM_API_BASE;
use crate::push::{PushSettings, DEFAULT_HISTORY_WINDOW_HOURS};

const APP_DIR: &str = "fastfish";

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub lexicon: LexiconConfig,
    pub allocation: AllocationConfig,
    pub hot: HotConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `<data dir>/fastfish/fastfish.db`.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LexiconConfig {
    /// Defaults to `<data dir>/fastfish/lexicon`.
    pub dir: Option<PathBuf>,
    /// Categories that fail screening. Empty means all of them.
    pub blocking_categories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub lease_ttl_secs: i64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotConfig {
    pub api_base: String,
    pub request_timeout_secs: u64,
    pub limit_per_source: usize,
    pub workers: usize,
    /// `"day"` for the local calendar day, or a rolling span like `"12h"`.
    pub dedup_window: String,
    pub utc_offset_hours: i32,
    pub retention_days: i64,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: 15,
            limit_per_source: DEFAULT_LIMIT_PER_SOURCE,
            workers: DEFAULT_WORKERS,
            dedup_window: "day".to_string(),
            utc_offset_hours: 8,
            retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub timeout_secs: u64,
    pub history_window_hours: i64,
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            history_window_hours: DEFAULT_HISTORY_WINDOW_HOURS,
            telegram_bot_token: None,
            telegram_api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default path when `None`.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            // Create default config with comments
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: config_path,
                source,
            },
            other => other,
        })
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.hot.recency_window()?;
        self.lexicon.policy()?;
        check_span(
            "allocation.lease_ttl_secs",
            self.allocation.lease_ttl_secs,
            chrono::Duration::try_seconds,
        )?;
        check_span(
            "hot.retention_days",
            self.hot.retention_days,
            chrono::Duration::try_days,
        )?;
        check_span(
            "push.history_window_hours",
            self.push.history_window_hours,
            chrono::Duration::try_hours,
        )?;
        if !(-12..=14).contains(&self.hot.utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "hot.utc_offset_hours out of range: {}",
                self.hot.utc_offset_hours
            )));
        }
        Ok(())
    }

    /// Get the default config file path: `~/.config/fastfish/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR).join("config.toml"))
    }

    fn data_dir() -> Result<PathBuf, ConfigError> {
        Ok(dirs::data_dir().ok_or(ConfigError::NoDataDir)?.join(APP_DIR))
    }

    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("fastfish.db")),
        }
    }

    pub fn lexicon_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.lexicon.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("lexicon")),
        }
    }

    pub fn push_settings(&self) -> Result<PushSettings, ConfigError> {
        Ok(PushSettings {
            window: self.hot.recency_window()?,
            history_window: chrono::Duration::try_hours(self.push.history_window_hours)
                .unwrap_or(chrono::Duration::MAX),
            utc_offset_hours: self.hot.utc_offset_hours,
        })
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# fastfish configuration
#
# Durations such as dedup_window accept "day" (local calendar day) or a
# rolling span: "12h", "90m", "2d".

[storage]
# SQLite database shared by every fastfish process.
# db_path = "/var/lib/fastfish/fastfish.db"

[lexicon]
# Directory with one word list per category, e.g. ad.txt, political.txt,
# 政治类型.txt. Screening is skipped (with a warning) when it is missing.
# dir = "/etc/fastfish/lexicon"

# Categories that make an article fail screening. Empty means all:
# ad, porn, political, reactionary, supplementary, other
blocking_categories = []

[allocation]
# Seconds a claim stays exclusive without being extended or released
lease_ttl_secs = 600

[hot]
api_base = "https://api.pearktrue.cn"
request_timeout_secs = 15
limit_per_source = 20
# Concurrent source fetches
workers = 10
dedup_window = "day"
# Offset used for calendar days and push times
utc_offset_hours = 8
# Raw hot items older than this are pruned
retention_days = 7

[push]
timeout_secs = 10
# Items delivered within this many hours are not pushed again
history_window_hours = 24
telegram_api_base = "https://api.telegram.org"
# telegram_bot_token = ""
"##
        .to_string()
    }
}

impl LexiconConfig {
    pub fn policy(&self) -> Result<ScreeningPolicy, ConfigError> {
        if self.blocking_categories.is_empty() {
            return Ok(ScreeningPolicy::default());
        }
        let blocking = self
            .blocking_categories
            .iter()
            .map(|name| name.parse::<LexiconCategory>().map_err(ConfigError::Invalid))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScreeningPolicy { blocking })
    }
}

impl AllocationConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.lease_ttl_secs).unwrap_or(chrono::Duration::MAX)
    }
}

impl HotConfig {
    pub fn recency_window(&self) -> Result<RecencyWindow, ConfigError> {
        RecencyWindow::parse(&self.dedup_window, self.utc_offset_hours)
            .map_err(ConfigError::Invalid)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.retention_days).unwrap_or(chrono::Duration::MAX)
    }
}

impl PushConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Rejects spans that are not positive or do not fit in a `chrono::Duration`.
fn check_span(
    name: &str,
    value: i64,
    to_span: fn(i64) -> Option<chrono::Duration>,
) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(ConfigError::Invalid(format!("{} must be positive", name)));
    }
    if to_span(value).is_none() {
        return Err(ConfigError::Invalid(format!(
            "{} out of range: {}",
            name, value
        )));
    }
    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
