//! Configuration management for DuckyDeck
//!
//! Provides persistent configuration that is automatically saved to and loaded
//! from a platform-specific config file.
//!
//! ## Config File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/duckydeck/config.toml` |
//! | macOS | `~/Library/Application Support/duckydeck/config.toml` |
//! | Windows | `%APPDATA%\duckydeck\config.toml` |
//!
//! ## Example
//!
//! ```no_run
//! use duckydeck::Config;
//!
//! let mut config = Config::load().unwrap_or_default();
//! config.script.default_locale = "DE".to_string();
//! config.save().expect("Failed to save config");
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "duckydeck";

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Returns the application config directory, creating it if needed.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    let app_dir = base.join(APP_DIR);
    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }
    Ok(app_dir)
}

/// Returns the path to the config file.
///
/// Creates the config directory if it doesn't exist.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Card and mount settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Script interpreter settings
    #[serde(default)]
    pub script: ScriptConfig,
    /// HID output settings
    #[serde(default)]
    pub hid: HidConfig,
    /// UI settings
    #[serde(default)]
    pub ui: UiConfig,
}

/// Storage session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Host directory used as the card root
    pub card_root: PathBuf,
    /// Mount point name reported by the session
    pub mount_point: String,
    /// Use the 1-bit bus mode
    pub one_bit_mode: bool,
    /// Format the card when the first mount attempt fails
    pub format_if_failed: bool,
    /// Mount automatically when a card is inserted
    pub auto_mount: bool,
    /// Poll for card insertion and removal
    pub hot_swap: bool,
    /// Verbose session logging
    pub debug: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            card_root: PathBuf::from("sdcard"),
            mount_point: "/sdcard".to_string(),
            one_bit_mode: true,
            format_if_failed: false,
            auto_mount: true,
            hot_swap: true,
            debug: false,
        }
    }
}

/// Script interpreter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Locale loaded when a run starts with no layout loaded
    pub default_locale: String,
    /// Card directory holding `<LOCALE>.json` layout files
    pub layouts_dir: String,
    /// Extension of script files listed in the picker
    pub script_extension: String,
    /// Upper bound on REPEAT iterations in one run
    pub max_repeat_iterations: u32,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            default_locale: "US".to_string(),
            layouts_dir: "/languages".to_string(),
            script_extension: ".txt".to_string(),
            max_repeat_iterations: 10_000,
        }
    }
}

/// HID output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HidConfig {
    /// Gadget device the reports are written to
    pub device: PathBuf,
    /// How long a press report is held (ms)
    pub press_ms: u64,
    /// How long the release report is held (ms)
    pub release_ms: u64,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/hidg0"),
            press_ms: 10,
            release_ms: 10,
        }
    }
}

/// UI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Refresh rate for UI updates (in Hz)
    pub refresh_rate_hz: u32,
    /// How long status messages stay visible, in seconds
    pub status_duration_secs: u32,
    /// Color theme (dark/light)
    pub theme: Theme,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 30,
            status_duration_secs: 3,
            theme: Theme::Dark,
        }
    }
}

/// Color theme options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get UI refresh interval as Duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.ui.refresh_rate_hz.max(1) as u64)
    }

    /// How long a status message stays on screen
    pub fn status_duration(&self) -> Duration {
        Duration::from_secs(self.ui.status_duration_secs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_config_path() -> PathBuf {
        env::temp_dir().join(format!("duckydeck-config-test-{}.toml", std::process::id()))
    }

    #[test]
    fn config_default_values() {
        let config = Config::default();
        assert_eq!(config.storage.mount_point, "/sdcard");
        assert!(config.storage.one_bit_mode);
        assert!(config.storage.auto_mount);
        assert!(config.storage.hot_swap);
        assert_eq!(config.script.default_locale, "US");
        assert_eq!(config.script.layouts_dir, "/languages");
        assert_eq!(config.script.max_repeat_iterations, 10_000);
        assert_eq!(config.hid.device, PathBuf::from("/dev/hidg0"));
        assert_eq!(config.hid.press_ms, 10);
        assert_eq!(config.hid.release_ms, 10);
        assert_eq!(config.ui.theme, Theme::Dark);
    }

    #[test]
    fn config_refresh_interval() {
        let mut config = Config::default();
        config.ui.refresh_rate_hz = 60;
        assert_eq!(config.refresh_interval().as_micros(), 16666);
    }

    #[test]
    fn config_refresh_interval_zero_hz_is_clamped() {
        let mut config = Config::default();
        config.ui.refresh_rate_hz = 0;
        assert_eq!(config.refresh_interval().as_secs(), 1);
    }

    #[test]
    fn config_save_and_load_roundtrip() {
        let path = temp_config_path();

        let mut config = Config::default();
        config.script.default_locale = "DE".to_string();
        config.hid.press_ms = 25;
        config.ui.theme = Theme::Light;

        config.save_to(&path).expect("Failed to save config");
        let loaded = Config::load_from(&path).expect("Failed to load config");

        assert_eq!(loaded.script.default_locale, "DE");
        assert_eq!(loaded.hid.press_ms, 25);
        assert_eq!(loaded.ui.theme, Theme::Light);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn config_load_missing_file_is_io_error() {
        let result = Config::load_from(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn config_serializes_to_toml() {
        let toml_str = toml::to_string_pretty(&Config::default()).expect("Failed to serialize");

        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[script]"));
        assert!(toml_str.contains("[hid]"));
        assert!(toml_str.contains("[ui]"));
        assert!(toml_str.contains("default_locale = \"US\""));
    }

    #[test]
    fn config_partial_toml_fills_defaults() {
        let toml_str = r#"
[storage]
card_root = "/media/usb0"
hot_swap = false

[script]
max_repeat_iterations = 50

[ui]
theme = "Light"
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");

        assert_eq!(config.storage.card_root, PathBuf::from("/media/usb0"));
        assert!(!config.storage.hot_swap);
        assert!(config.storage.auto_mount);
        assert_eq!(config.script.max_repeat_iterations, 50);
        assert_eq!(config.script.default_locale, "US");
        assert_eq!(config.hid.release_ms, 10);
        assert_eq!(config.ui.theme, Theme::Light);
    }

    #[test]
    fn config_rejects_bad_toml() {
        let result: Result<Config, _> = toml::from_str("[storage\nmount_point = 3");
        assert!(result.is_err());
    }

    #[test]
    fn config_error_display() {
        assert_eq!(ConfigError::NoConfigDir.to_string(), "Could not determine config directory");

        let io_err = ConfigError::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(io_err.to_string().contains("IO error"));
    }

    #[test]
    fn config_path_is_under_app_dir() {
        if let Ok(path) = config_path() {
            assert!(path.to_string_lossy().contains("duckydeck"));
            assert!(path.to_string_lossy().ends_with("config.toml"));
        }
    }
}
