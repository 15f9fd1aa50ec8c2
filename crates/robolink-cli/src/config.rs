//! CLI configuration file

use anyhow::{Context, Result};
use robolink_core::link::LinkConfig;
use robolink_core::settings::SettingsStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for the terminal remote control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Device used when none is given on the command line
    pub device: Option<String>,
    /// Treat the device as a `host:port` TCP endpoint
    pub tcp: bool,
    /// Skip the reserved channel fallback
    pub no_fallback: bool,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Link timing and serial settings
    pub link: LinkConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: None,
            tcp: false,
            no_fallback: false,
            log_level: "robolink=info".to_string(),
            link: LinkConfig::default(),
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        SettingsStore::default_dir().map(|d| d.join("config.json"))
    }

    /// Load the config, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config
            .link
            .watchdog
            .validate()
            .with_context(|| format!("Invalid link settings in {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.link.watchdog.timeout_ms, 3000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let mut config = AppConfig::default();
        config.device = Some("/dev/rfcomm0".to_string());
        config.link.baud_rate = 9600;
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_and_invalid_timing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, r#"{"tcp": true, "link": {"watchdog": {"tick_ms": 20}}}"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert!(config.tcp);
        assert_eq!(config.link.watchdog.tick_ms, 20);
        assert_eq!(config.link.watchdog.min_comm_interval_ms, 900);

        fs::write(
            &path,
            r#"{"link": {"watchdog": {"min_comm_interval_ms": 5000}}}"#,
        )
        .unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
