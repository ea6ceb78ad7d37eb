use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use trellis_db::JournalConfig;
use trellis_queue::{RetryConfig, TokenConfig};

use crate::error::{DaemonError, DaemonResult};

/// Daemon configuration, read from a TOML file. Every field has a default,
/// so an empty file is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding the journal.
    pub data_dir: PathBuf,
    /// Hex device identity. Generated and persisted on first start when
    /// unset.
    pub device_id: Option<String>,
    /// `error`, `warn`, `info`, `debug`, or `trace`.
    pub log_level: String,
    pub journal: JournalConfig,
    pub retry: RetrySettings,
    pub tokens: TokenConfig,
    /// Content is not collected into a store using more than this.
    pub quota_bytes: Option<u64>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".trellis"),
            device_id: None,
            log_level: "info".to_string(),
            journal: JournalConfig::default(),
            retry: RetrySettings::default(),
            tokens: TokenConfig::default(),
            quota_bytes: None,
        }
    }
}

impl DaemonConfig {
    /// Read a configuration file.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|reason| DaemonError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(text: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        if config.retry.min_interval_ms > config.retry.max_interval_ms {
            return Err(format!(
                "retry.min_interval_ms ({}) exceeds retry.max_interval_ms ({})",
                config.retry.min_interval_ms, config.retry.max_interval_ms
            ));
        }
        Ok(config)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("trellis.journal")
    }
}

/// Backoff settings in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 100,
            max_interval_ms: 60_000,
            max_attempts: None,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            min_interval: Duration::from_millis(settings.min_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
            max_attempts: settings.max_attempts,
        }
    }
}
