use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::monitor::MonitorSettings;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/castmon.conf";
const DEFAULT_PEER_ADDRESS: &str = "192.168.29.28";
const DEFAULT_DATA_DIR: &str = "/var/lib/castmon";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 2000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5000;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// LAN address of the TV; the capture filter is scoped to it
    pub peer_address: IpAddr,
    /// Capture interface; `None` picks the first usable one
    pub interface: Option<String>,
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub stop_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_address: IpAddr::from([192, 168, 29, 28]),
            interface: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load from the config file, then apply environment overrides.
    ///
    /// The file path comes from `CASTMON_CONFIG`, falling back to
    /// `/etc/castmon.conf`. A missing file just means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CASTMON_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = Self::from_file(Path::new(&config_path))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a `key = value` file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            config.apply_file(&content)?;
        }
        Ok(config)
    }

    /// Apply `key = value` lines. `#` starts a comment; unknown keys are ignored.
    pub fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    /// Apply environment overrides, looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // TV_IP is the older name for the peer address
        if let Some(val) = lookup("TV_IP") {
            self.set("peer_address", &val)?;
        }

        let overrides = [
            ("CASTMON_PEER_ADDRESS", "peer_address"),
            ("CASTMON_INTERFACE", "interface"),
            ("CASTMON_DATA_DIR", "data_dir"),
            ("CASTMON_POLL_INTERVAL_MS", "poll_interval_ms"),
            ("CASTMON_RETRY_BACKOFF_MS", "retry_backoff_ms"),
            ("CASTMON_STOP_TIMEOUT_MS", "stop_timeout_ms"),
            ("CASTMON_LOG_LEVEL", "log_level"),
        ];
        for (var, key) in overrides {
            if let Some(val) = lookup(var) {
                self.set(key, &val)?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "peer_address" => self.peer_address = value.parse().map_err(|_| invalid())?,
            "interface" => {
                self.interface = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "data_dir" => self.data_dir = PathBuf::from(value),
            "poll_interval_ms" => {
                self.poll_interval = parse_millis(value, true).ok_or_else(invalid)?
            }
            "retry_backoff_ms" => {
                self.retry_backoff = parse_millis(value, false).ok_or_else(invalid)?
            }
            "stop_timeout_ms" => {
                self.stop_timeout = parse_millis(value, false).ok_or_else(invalid)?
            }
            "log_level" => self.log_level = value.to_string(),
            _ => tracing::debug!("Ignoring unknown config key '{}'", key),
        }
        Ok(())
    }

    /// Timing for the packet monitor.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: self.poll_interval,
            retry_backoff: self.retry_backoff,
            stop_timeout: self.stop_timeout,
        }
    }

    /// Filter string for the tracing subscriber.
    pub fn tracing_filter(&self) -> String {
        format!("castmon={}", self.log_level)
    }
}

/// A poll interval of zero would spin, so it may be required to be positive.
fn parse_millis(value: &str, positive: bool) -> Option<Duration> {
    let millis: u64 = value.parse().ok()?;
    if positive && millis == 0 {
        return None;
    }
    Some(Duration::from_millis(millis))
}
