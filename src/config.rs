//! Configuration loading and management
//!
//! The bridge reads a JSON settings file (`appsettings.json` in the working
//! directory unless `TS3_MUTE_BRIDGE_CONFIG` points elsewhere). A missing
//! file is replaced by a template the user has to fill in.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::monitor::MonitorSettings;
use crate::telnet::Endpoint;

/// Environment variable overriding the settings file location
pub const CONFIG_PATH_ENV: &str = "TS3_MUTE_BRIDGE_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "appsettings.json";

/// Settings file as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileConfig {
    ts3_address: Option<String>,
    ts3_api_key: Option<String>,
    ha_base_url: Option<String>,
    ha_token: Option<String>,
    ha_entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation_timeout_ms: Option<u64>,
}

/// Validated bridge configuration
#[derive(Clone)]
pub struct Config {
    /// ClientQuery endpoint of the local TeamSpeak client
    pub endpoint: Endpoint,

    /// ClientQuery API key
    pub api_key: String,

    /// Home Assistant base URL, e.g. `http://homeassistant.local:8123`
    pub ha_base_url: String,

    /// Long-lived Home Assistant access token
    pub ha_token: String,

    /// Entity mirrored by the bridge, e.g. `input_boolean.mic_live`
    pub ha_entity_id: String,

    /// Pause between polling cycles
    pub poll_interval: Duration,

    /// Deadline for each protocol operation
    pub operation_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("ha_base_url", &self.ha_base_url)
            .field("ha_token", &"<redacted>")
            .field("ha_entity_id", &self.ha_entity_id)
            .field("poll_interval", &self.poll_interval)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl Config {
    /// Settings file location from the environment or the default
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load and validate the settings file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate settings from JSON
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: FileConfig = serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("failed to parse configuration: {e}")))?;

        let ts3_address = required(file.ts3_address, "Ts3Address")?;
        let endpoint = Endpoint::parse(&ts3_address)?;

        Ok(Self {
            endpoint,
            api_key: required(file.ts3_api_key, "Ts3ApiKey")?,
            ha_base_url: required(file.ha_base_url, "HaBaseUrl")?,
            ha_token: required(file.ha_token, "HaToken")?,
            ha_entity_id: required(file.ha_entity_id, "HaEntityId")?,
            poll_interval: millis(
                file.poll_interval_ms,
                "PollIntervalMs",
                MonitorSettings::DEFAULT_POLL_INTERVAL,
            )?,
            operation_timeout: millis(
                file.operation_timeout_ms,
                "OperationTimeoutMs",
                MonitorSettings::DEFAULT_OPERATION_TIMEOUT,
            )?,
        })
    }

    /// Write a template settings file with placeholder values
    pub fn write_default(path: &Path) -> Result<()> {
        let template = FileConfig {
            ts3_address: Some("localhost:25639".into()),
            ts3_api_key: Some("your-api-key".into()),
            ha_base_url: Some("http://homeassistant.local:8123".into()),
            ha_token: Some("your-ha-token".into()),
            ha_entity_id: Some("input_boolean.your_entity_id".into()),
            poll_interval_ms: None,
            operation_timeout_ms: None,
        };

        let json = serde_json::to_string_pretty(&template)
            .map_err(|e| Error::Configuration(format!("failed to render template: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            Error::Configuration(format!("failed to write {}: {e}", path.display()))
        })
    }

    /// Settings for the monitoring loop
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            operation_timeout: self.operation_timeout,
            poll_interval: self.poll_interval,
            ..MonitorSettings::new(self.endpoint.clone(), self.api_key.clone())
        }
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Configuration(format!(
            "{field} is missing in configuration"
        ))),
    }
}

fn millis(value: Option<u64>, field: &str, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(0) => Err(Error::Configuration(format!("{field} must be greater than zero"))),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}
