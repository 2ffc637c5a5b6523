//! Configuration loading
//!
//! Settings come from a TOML file. Every key has a default, so only the
//! notifier credentials and the rule tree need to be written out. The rule
//! tree (`[loop.<section>.<kind>]` / `[archive.<section>.<kind>]`) is
//! resolved once into a flat [`RuleStore`](crate::notify::RuleStore).

mod rules;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

pub use rules::build_rule_store;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "STATIONWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "stationwatch.toml";

/// Top-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Master switch; when false nothing is monitored
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Default count threshold for every rule
    #[serde(default = "default_count")]
    pub count: u32,

    /// Default wait time (seconds) for every rule
    #[serde(default = "default_wait_time")]
    pub wait_time: u64,

    /// Default for sending a notification when a condition clears
    #[serde(default = "default_true")]
    pub return_notification: bool,

    #[serde(default)]
    pub notifier: NotifierSettings,

    /// Rules on real-time packets
    #[serde(default, rename = "loop")]
    pub loop_rules: Option<BindingSection>,

    /// Rules on archive records
    #[serde(default, rename = "archive")]
    pub archive_rules: Option<BindingSection>,
}

/// Outbound channel settings
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierSettings {
    /// Send notifications; when false they are only logged
    #[serde(default = "default_true")]
    pub send: bool,

    /// Write every notification to the log
    #[serde(default = "default_true")]
    pub log: bool,

    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default = "default_api")]
    pub api: String,

    #[serde(default)]
    pub app_token: Option<String>,

    #[serde(default)]
    pub user_key: Option<String>,

    /// Seconds between repeated "halted" log lines after a client error
    #[serde(default = "default_backoff_secs")]
    pub client_error_log_frequency: u64,

    /// Seconds to suspend sending after a server error
    #[serde(default = "default_backoff_secs")]
    pub server_error_wait_period: u64,

    /// Seconds to wait for the endpoint before giving up on a send
    #[serde(default = "default_send_timeout")]
    pub send_timeout: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            send: true,
            log: true,
            server: default_server(),
            api: default_api(),
            app_token: None,
            user_key: None,
            client_error_log_frequency: default_backoff_secs(),
            server_error_wait_period: default_backoff_secs(),
            send_timeout: default_send_timeout(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl NotifierSettings {
    pub fn client_error_log_frequency(&self) -> Result<Duration, ConfigError> {
        secs("notifier.client_error_log_frequency", self.client_error_log_frequency)
    }

    pub fn server_error_wait_period(&self) -> Result<Duration, ConfigError> {
        secs("notifier.server_error_wait_period", self.server_error_wait_period)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.send_timeout)
    }
}

/// `[loop]` or `[archive]`: per-binding defaults plus one table per
/// monitored observation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindingSection {
    #[serde(default)]
    pub wait_time: Option<u64>,

    #[serde(default)]
    pub return_notification: Option<bool>,

    #[serde(flatten)]
    pub observations: BTreeMap<String, ObservationSection>,
}

/// One monitored observation and its rule kinds
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservationSection {
    /// Batch key; defaults to the section name
    #[serde(default)]
    pub observation: Option<String>,

    /// Name used in messages; defaults to the section name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub min: Option<ThresholdSection>,

    #[serde(default)]
    pub max: Option<ThresholdSection>,

    #[serde(default)]
    pub equal: Option<ThresholdSection>,

    #[serde(default)]
    pub missing: Option<KindOverrides>,
}

/// `min`, `max` or `equal` rule
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdSection {
    pub value: f64,

    #[serde(flatten)]
    pub overrides: KindOverrides,
}

/// Per-rule overrides of the binding and global defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KindOverrides {
    #[serde(default)]
    pub count: Option<u32>,

    #[serde(default)]
    pub wait_time: Option<u64>,

    #[serde(default)]
    pub return_notification: Option<bool>,
}

/// Configuration errors; all of them stop startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("Invalid rule [{binding}.{section}.{kind}]: {reason}")]
    InvalidRule {
        binding: String,
        section: String,
        kind: String,
        reason: String,
    },
}

impl Settings {
    /// Parse and validate settings from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "count",
                reason: "must be at least 1".to_string(),
            });
        }

        let notifier = &self.notifier;
        if self.enable && notifier.send {
            for (key, value) in [
                ("notifier.app_token", &notifier.app_token),
                ("notifier.user_key", &notifier.user_key),
            ] {
                if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                    return Err(ConfigError::InvalidSetting {
                        key,
                        reason: "required when notifier.send is true".to_string(),
                    });
                }
            }
        }

        if notifier.send_timeout == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "notifier.send_timeout",
                reason: "must be at least 1 second".to_string(),
            });
        }

        if !notifier.api.starts_with('/') {
            return Err(ConfigError::InvalidSetting {
                key: "notifier.api",
                reason: format!("'{}' must start with '/'", notifier.api),
            });
        }

        notifier.client_error_log_frequency()?;
        notifier.server_error_wait_period()?;
        secs("wait_time", self.wait_time)?;
        Ok(())
    }
}

/// Load settings from a TOML file
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Settings::from_toml_str(&contents)
}

/// Config path from the environment, falling back to the default
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub(crate) fn secs(key: &'static str, value: u64) -> Result<Duration, ConfigError> {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| ConfigError::InvalidSetting {
            key,
            reason: format!("{} seconds is out of range", value),
        })
}

// Default value functions for serde.

fn default_true() -> bool {
    true
}

fn default_count() -> u32 {
    10
}

fn default_wait_time() -> u64 {
    3600
}

fn default_server() -> String {
    "api.pushover.net:443".to_string()
}

fn default_api() -> String {
    "/1/messages.json".to_string()
}

fn default_backoff_secs() -> u64 {
    3600
}

fn default_send_timeout() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    crate::notify::DEFAULT_QUEUE_CAPACITY
}
