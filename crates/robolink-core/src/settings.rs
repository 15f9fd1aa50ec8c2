//! Persisted settings
//!
//! Each record is a JSON file named after its key in the settings directory
//! (`<config dir>/robolink` by default).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::control::DEFAULT_MAX_SPEED;

/// Settings key of the line following mode
pub const LINE_FOLLOWER_KEY: &str = "line_follower";

/// Settings key of the face pursuit mode
pub const FACE_PURSUIT_KEY: &str = "face_pursuit";

/// Settings store errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No configuration directory available")]
    NoConfigDir,
}

/// PID gains and cruising speed of a driving mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidSettings {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Base wheel speed the controller steers around
    pub max_speed: i32,
}

impl Default for PidSettings {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            max_speed: DEFAULT_MAX_SPEED,
        }
    }
}

/// Directory of JSON settings records
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default settings directory for this user
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("robolink"))
    }

    /// Store rooted at the default directory
    pub fn open_default() -> Result<Self, SettingsError> {
        Self::default_dir()
            .map(Self::new)
            .ok_or(SettingsError::NoConfigDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Read a record, `Ok(None)` if it was never saved
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write a record, creating the directory if needed
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(value)?;
        let path = self.path_for(key);
        fs::write(&path, content)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// PID settings for a mode; defaults when absent or unreadable
    pub fn load_pid(&self, key: &str) -> PidSettings {
        match self.load(key) {
            Ok(Some(settings)) => settings,
            Ok(None) => PidSettings::default(),
            Err(e) => {
                warn!("Ignoring PID settings '{}': {}", key, e);
                PidSettings::default()
            }
        }
    }

    pub fn save_pid(&self, key: &str, settings: &PidSettings) -> Result<(), SettingsError> {
        self.save(key, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_record_gives_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.load_pid(LINE_FOLLOWER_KEY), PidSettings::default());
        assert_eq!(PidSettings::default().max_speed, 50);
    }

    #[test]
    fn test_save_then_load_pid() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested"));
        let settings = PidSettings {
            kp: 0.8,
            ki: 0.05,
            kd: 1.5,
            max_speed: 70,
        };
        store.save_pid(FACE_PURSUIT_KEY, &settings).unwrap();
        assert!(store.path_for(FACE_PURSUIT_KEY).exists());
        assert_eq!(store.load_pid(FACE_PURSUIT_KEY), settings);
        // Other modes are unaffected
        assert_eq!(store.load_pid(LINE_FOLLOWER_KEY), PidSettings::default());
    }

    #[test]
    fn test_corrupt_record_falls_back() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        fs::write(store.path_for(LINE_FOLLOWER_KEY), "{not json").unwrap();
        assert!(matches!(
            store.load::<PidSettings>(LINE_FOLLOWER_KEY),
            Err(SettingsError::Json(_))
        ));
        assert_eq!(store.load_pid(LINE_FOLLOWER_KEY), PidSettings::default());
    }

    #[test]
    fn test_partial_record_uses_field_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        fs::write(store.path_for(LINE_FOLLOWER_KEY), r#"{"kd": 2.0}"#).unwrap();
        let settings = store.load_pid(LINE_FOLLOWER_KEY);
        assert_eq!(settings.kd, 2.0);
        assert_eq!(settings.kp, 1.0);
        assert_eq!(settings.max_speed, 50);
    }
}
