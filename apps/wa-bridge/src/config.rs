//! Bridge configuration.
//!
//! Read from `~/.config/crmlink/whatsapp.json` (`%APPDATA%` on Windows),
//! or from the path in `CRMLINK_CONFIG`. Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crmlink_wa_connection::ManagerConfig;

const CONFIG_ENV: &str = "CRMLINK_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket URL of the WhatsApp gateway.
    pub gateway_url: String,

    /// Directory holding the device's persisted auth material.
    pub auth_dir: PathBuf,

    /// Fixed delay before reconnecting after a transient close.
    pub reconnect_delay_secs: u64,

    /// Render pairing QR codes in the terminal.
    pub print_qr: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://127.0.0.1:8765/ws".into(),
            auth_dir: config_base_dir().join("crmlink").join("whatsapp-auth"),
            reconnect_delay_secs: 5,
            print_qr: true,
        }
    }
}

impl BridgeConfig {
    /// Loads the configuration file, falling back to defaults when it is
    /// missing or unreadable as JSON.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "failed to parse config, using defaults: {e}"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new(&self.auth_dir)
            .with_reconnect_delay(Duration::from_secs(self.reconnect_delay_secs))
    }
}

fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_base_dir().join("crmlink").join("whatsapp.json"),
    }
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load_from(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.reconnect_delay_secs, 5);
        assert!(config.print_qr);
        assert!(config.auth_dir.ends_with("crmlink/whatsapp-auth"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("whatsapp.json");
        std::fs::write(
            &path,
            r#"{"gateway_url": "ws://gateway:9000/ws", "print_qr": false}"#,
        )
        .unwrap();

        let config = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway_url, "ws://gateway:9000/ws");
        assert!(!config.print_qr);
        assert_eq!(config.reconnect_delay_secs, 5);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("whatsapp.json");
        std::fs::write(&path, "{ gateway_url: ").unwrap();

        let config = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn manager_config_carries_dir_and_delay() {
        let config = BridgeConfig {
            auth_dir: PathBuf::from("/var/lib/crmlink/auth"),
            reconnect_delay_secs: 12,
            ..Default::default()
        };
        let manager = config.manager_config();
        assert_eq!(manager.auth_dir, PathBuf::from("/var/lib/crmlink/auth"));
        assert_eq!(manager.reconnect_delay, Duration::from_secs(12));
    }
}
