use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::Result;
use crate::session::PasswordOptions;

pub const SETTINGS_FILE_NAME: &str = "settings.json";

const MAX_CLIPBOARD_CLEAR_SECONDS: u64 = 120;
const MAX_AUTO_LOCK_MINUTES: u64 = 60;
const MIN_PASSWORD_LENGTH: u32 = 8;
const MAX_PASSWORD_LENGTH: u32 = 128;
const MAX_TEXT_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub bw_path: String,
    pub server_url: String,
    /// 0 disables clearing.
    pub clipboard_clear_seconds: u64,
    /// 0 disables auto-lock.
    pub auto_lock_minutes: u64,
    pub password_length: u32,
    pub password_uppercase: bool,
    pub password_lowercase: bool,
    pub password_numbers: bool,
    pub password_special: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bw_path: "bw".to_string(),
            server_url: String::new(),
            clipboard_clear_seconds: 30,
            auto_lock_minutes: 5,
            password_length: 20,
            password_uppercase: true,
            password_lowercase: true,
            password_numbers: true,
            password_special: true,
        }
    }
}

impl Settings {
    /// Replace every out-of-range value with its default.
    pub fn validated(mut self) -> Self {
        let defaults = Settings::default();

        if self.clipboard_clear_seconds > MAX_CLIPBOARD_CLEAR_SECONDS {
            self.clipboard_clear_seconds = defaults.clipboard_clear_seconds;
        }
        if self.auto_lock_minutes > MAX_AUTO_LOCK_MINUTES {
            self.auto_lock_minutes = defaults.auto_lock_minutes;
        }
        if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&self.password_length) {
            self.password_length = defaults.password_length;
        }
        if self.bw_path.trim().is_empty() || self.bw_path.len() > MAX_TEXT_LEN {
            self.bw_path = defaults.bw_path;
        }
        if self.server_url.len() > MAX_TEXT_LEN {
            self.server_url = defaults.server_url;
        }
        self
    }

    pub fn clipboard_clear_delay(&self) -> Duration {
        Duration::from_secs(self.clipboard_clear_seconds)
    }

    pub fn auto_lock_after(&self) -> Option<Duration> {
        (self.auto_lock_minutes > 0).then(|| Duration::from_secs(self.auto_lock_minutes * 60))
    }

    pub fn password_options(&self) -> PasswordOptions {
        PasswordOptions {
            length: self.password_length,
            uppercase: self.password_uppercase,
            lowercase: self.password_lowercase,
            numbers: self.password_numbers,
            special: self.password_special,
        }
    }
}

/// Default data directory: `<platform data dir>/bitty`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bitty")
}

fn get_settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE_NAME)
}

/// Load settings; a missing or unreadable file yields the defaults.
pub fn load_settings(data_dir: &Path) -> Settings {
    let path = get_settings_path(data_dir);

    if !path.exists() {
        return Settings::default();
    }

    let parsed = std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|content| {
            serde_json::from_str::<Settings>(&content).map_err(|e| e.to_string())
        });

    match parsed {
        Ok(settings) => settings.validated(),
        Err(e) => {
            warn!("Ignoring unreadable settings file {:?}: {}", path, e);
            Settings::default()
        }
    }
}

/// Validate and save settings, returning what was written.
pub fn save_settings(data_dir: &Path, settings: &Settings) -> Result<Settings> {
    let settings = settings.clone().validated();
    std::fs::create_dir_all(data_dir)?;
    let content = serde_json::to_string_pretty(&settings)?;
    std::fs::write(get_settings_path(data_dir), content)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_settings(dir.path()), Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{"bwPath":"/usr/local/bin/bw","clipboardClearSeconds":10,"theme":"dark"}"#,
        )
        .unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings.bw_path, "/usr/local/bin/bw");
        assert_eq!(settings.clipboard_clear_seconds, 10);
        assert_eq!(settings.password_length, 20);
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{"clipboardClearSeconds":500,"autoLockMinutes":61,"passwordLength":4,"bwPath":""}"#,
        )
        .unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{"clipboardClearSeconds":"soon"}"#,
        )
        .unwrap();
        assert_eq!(load_settings(dir.path()), Settings::default());
    }

    #[test]
    fn test_save_validates_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            clipboard_clear_seconds: 0,
            password_length: 999,
            ..Default::default()
        };
        let saved = save_settings(dir.path(), &settings).unwrap();
        assert_eq!(saved.clipboard_clear_seconds, 0);
        assert_eq!(saved.password_length, 20);
        assert_eq!(load_settings(dir.path()), saved);

        let raw = std::fs::read_to_string(dir.path().join(SETTINGS_FILE_NAME)).unwrap();
        assert!(raw.contains("clipboardClearSeconds"));
    }

    #[test]
    fn test_derived_values() {
        let mut settings = Settings::default();
        assert_eq!(settings.clipboard_clear_delay(), Duration::from_secs(30));
        assert_eq!(settings.auto_lock_after(), Some(Duration::from_secs(300)));
        settings.auto_lock_minutes = 0;
        assert_eq!(settings.auto_lock_after(), None);
        assert_eq!(settings.password_options().length, 20);
    }
}
