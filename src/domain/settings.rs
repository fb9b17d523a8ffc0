//! Bridge configuration, persisted as JSON in the user config directory.

use crate::domain::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: default_rotation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Vendor service UUID identifying the sensor
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,
    /// Telemetry characteristic UUID
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: Uuid,
    /// Namespaced local socket name the subscriber connects to
    #[serde(default = "default_pipe_name")]
    pub pipe_name: String,
    /// Backoff between session resolution attempts and after read failures
    #[serde(default = "default_retry_delay_ms")]
    pub session_retry_delay_ms: u64,
    /// Backoff after pipe bind/accept failures
    #[serde(default = "default_retry_delay_ms")]
    pub pipe_retry_delay_ms: u64,

    #[serde(default)]
    pub log: LogSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            characteristic_uuid: default_characteristic_uuid(),
            pipe_name: default_pipe_name(),
            session_retry_delay_ms: default_retry_delay_ms(),
            pipe_retry_delay_ms: default_retry_delay_ms(),
            log: LogSettings::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "fuky_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_service_uuid() -> Uuid {
    protocol::TARGET_SERVICE_UUID
}
fn default_characteristic_uuid() -> Uuid {
    protocol::TARGET_CHARACTERISTIC_UUID
}
fn default_pipe_name() -> String {
    "fuky-imu.sock".to_string()
}
fn default_retry_delay_ms() -> u64 {
    1000
}

impl BridgeSettings {
    /// Load settings from the config directory, falling back to defaults
    /// when the file is missing or unreadable.
    pub fn load_or_default() -> Self {
        Self::settings_path()
            .and_then(|p| Self::load_from(&p))
            .unwrap_or_default()
    }

    fn settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        path.push("FukyBridge");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::settings_path()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_an_empty_json_object() {
        let settings: BridgeSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.service_uuid, protocol::TARGET_SERVICE_UUID);
        assert_eq!(
            settings.characteristic_uuid,
            protocol::TARGET_CHARACTERISTIC_UUID
        );
        assert_eq!(settings.pipe_name, "fuky-imu.sock");
        assert_eq!(settings.session_retry_delay_ms, 1000);
    }

    #[test]
    fn settings_round_trip_through_json() {
        let settings = BridgeSettings {
            pipe_name: "custom.sock".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: BridgeSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pipe_name, "custom.sock");
        assert_eq!(back.service_uuid, settings.service_uuid);
    }
}
