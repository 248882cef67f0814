//! Configuration loading and management
//!
//! Two layers: [`Config`] holds daemon paths and tunables from the
//! environment; [`Settings`] is the user-editable `settings.json` shared
//! with the settings dialog, watched for changes while running.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::hotkey::KeyBindings;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8765";
const DEFAULT_POLL_MS: u64 = 1000;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the synchronization bus listens on
    pub listen_addr: SocketAddr,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// User settings file
    pub settings_path: PathBuf,

    /// Last selected session, restored on startup
    pub selection_path: PathBuf,

    /// Upper bound between two registry refreshes
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment and defaults
    ///
    /// `SOUNDBOARD_ADDR` overrides the bus address and `SOUNDBOARD_POLL_MS`
    /// the refresh interval.
    pub fn load() -> Result<Self> {
        let base = dirs::config_dir().context("no per-user configuration directory")?;
        Self::from_parts(
            base.join("soundboard"),
            std::env::var("SOUNDBOARD_ADDR").ok().as_deref(),
            std::env::var("SOUNDBOARD_POLL_MS").ok().as_deref(),
        )
    }

    fn from_parts(data_dir: PathBuf, addr: Option<&str>, poll_ms: Option<&str>) -> Result<Self> {
        let listen_addr = addr
            .unwrap_or(DEFAULT_LISTEN_ADDR)
            .parse()
            .context("invalid SOUNDBOARD_ADDR")?;
        let poll_ms = match poll_ms {
            Some(ms) => ms.parse::<u64>().context("invalid SOUNDBOARD_POLL_MS")?,
            None => DEFAULT_POLL_MS,
        };

        Ok(Self {
            listen_addr,
            settings_path: data_dir.join("settings.json"),
            selection_path: data_dir.join("selection.json"),
            data_dir,
            poll_interval: Duration::from_millis(poll_ms.clamp(100, 10_000)),
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

/// Errors reading the settings file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Corner of the screen the overlay is anchored to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// User settings, stored as camelCase JSON
///
/// Only `volume_delta` and `key_bindings` drive the daemon; the other
/// fields belong to the overlay and are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub position: Position,
    pub offset_x: i32,
    pub offset_y: i32,
    /// Overlay opacity in percent, 20..=100
    #[serde(deserialize_with = "saturating_u8")]
    pub opacity: u8,
    /// Volume step per key press, 1..=20
    #[serde(deserialize_with = "saturating_u8")]
    pub volume_delta: u8,
    pub key_bindings: KeyBindings,
    pub language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            position: Position::TopLeft,
            offset_x: 10,
            offset_y: 10,
            opacity: 100,
            volume_delta: 1,
            key_bindings: KeyBindings::default(),
            language: "en".to_string(),
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = serde_json::from_str(json)?;
        settings.opacity = settings.opacity.clamp(20, 100);
        settings.volume_delta = settings.volume_delta.clamp(1, 20);
        Ok(settings)
    }

    /// Read settings; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Any JSON number, saturated into `u8`; `from_json` narrows it further
fn saturating_u8<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(value.round().clamp(0.0, f64::from(u8::MAX)) as u8)
}

/// Reloads the settings file when its modification time changes
#[derive(Debug)]
pub struct SettingsWatcher {
    path: PathBuf,
    modified: Option<SystemTime>,
    current: Settings,
}

impl SettingsWatcher {
    /// Load the initial settings, falling back to defaults on error
    pub fn open(path: PathBuf) -> Self {
        let modified = modified_time(&path);
        let current = Settings::load(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "using default settings");
            Settings::default()
        });
        info!(
            path = %path.display(),
            volume_delta = current.volume_delta,
            "settings loaded"
        );
        Self {
            path,
            modified,
            current,
        }
    }

    pub fn current(&self) -> &Settings {
        &self.current
    }

    /// Returns the new settings if the file changed and parsed. A broken
    /// file keeps the previous settings.
    pub fn poll(&mut self) -> Option<Settings> {
        let modified = modified_time(&self.path);
        if modified == self.modified {
            return None;
        }
        self.modified = modified;

        match Settings::load(&self.path) {
            Ok(settings) if settings != self.current => {
                info!(volume_delta = settings.volume_delta, "settings reloaded");
                self.current = settings.clone();
                Some(settings)
            }
            Ok(_) => {
                debug!("settings file touched without changes");
                None
            }
            Err(e) => {
                warn!(error = %e, "ignoring invalid settings file, keeping previous settings");
                None
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{vk, Chord};
    use std::fs::File;
    use std::io::Write;

    fn write_settings(path: &Path, json: &str, bump_secs: u64) {
        let mut file = File::create(path).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        // Don't rely on filesystem timestamp granularity
        file.set_modified(SystemTime::now() + Duration::from_secs(bump_secs))
            .unwrap();
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_parts(PathBuf::from("/tmp/soundboard"), None, None).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8765".parse().unwrap());
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert!(config.settings_path.ends_with("settings.json"));
        assert!(config.selection_path.starts_with("/tmp/soundboard"));
    }

    #[test]
    fn test_config_overrides() {
        let config =
            Config::from_parts(PathBuf::from("/tmp/x"), Some("127.0.0.1:9000"), Some("5")).unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        // Clamped to the lower bound
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(Config::from_parts(PathBuf::from("/tmp/x"), Some("nope"), None).is_err());
    }

    #[test]
    fn test_settings_clamping() {
        let settings = Settings::from_json(r#"{"volumeDelta": 50, "opacity": 5}"#).unwrap();
        assert_eq!(settings.volume_delta, 20);
        assert_eq!(settings.opacity, 20);

        let settings = Settings::from_json(r#"{"volumeDelta": 0}"#).unwrap();
        assert_eq!(settings.volume_delta, 1);
    }

    #[test]
    fn test_settings_clamp_beyond_integer_width() {
        let json = r#"{"volumeDelta": 300, "opacity": 1000, "keyBindings": {"navigation": "Ctrl+VolumeMute"}}"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.volume_delta, 20);
        assert_eq!(settings.opacity, 100);
        // The rest of the file still applies
        assert!(settings.key_bindings.navigation.modifiers.control);

        let settings = Settings::from_json(r#"{"volumeDelta": -3, "opacity": -50}"#).unwrap();
        assert_eq!(settings.volume_delta, 1);
        assert_eq!(settings.opacity, 20);

        let settings = Settings::from_json(r#"{"volumeDelta": 4.6}"#).unwrap();
        assert_eq!(settings.volume_delta, 5);

        assert!(Settings::from_json(r#"{"volumeDelta": "five"}"#).is_err());
    }

    #[test]
    fn test_watcher_applies_out_of_range_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        write_settings(&path, r#"{"volumeDelta": 300}"#, 0);

        let mut watcher = SettingsWatcher::open(path.clone());
        assert_eq!(watcher.current().volume_delta, 20);

        write_settings(&path, r#"{"volumeDelta": -3, "language": "es"}"#, 10);
        let reloaded = watcher.poll().unwrap();
        assert_eq!(reloaded.volume_delta, 1);
        assert_eq!(reloaded.language, "es");
    }

    #[test]
    fn test_settings_partial_file() {
        let json = r#"{
            "position": "bottom-right",
            "language": "es",
            "keyBindings": { "navigation": "Ctrl+Alt+VolumeMute" },
            "somethingElse": true
        }"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.position, Position::BottomRight);
        assert_eq!(settings.language, "es");
        assert_eq!(settings.volume_delta, 1);
        assert!(settings.key_bindings.navigation.modifiers.alt);
        assert_eq!(settings.key_bindings.volume_up, Chord::new(vk::VOLUME_UP));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_watcher_reloads_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        write_settings(&path, r#"{"volumeDelta": 2}"#, 0);

        let mut watcher = SettingsWatcher::open(path.clone());
        assert_eq!(watcher.current().volume_delta, 2);
        assert!(watcher.poll().is_none());

        write_settings(&path, r#"{"volumeDelta": 7}"#, 10);
        let reloaded = watcher.poll().unwrap();
        assert_eq!(reloaded.volume_delta, 7);
        assert_eq!(watcher.current().volume_delta, 7);
        assert!(watcher.poll().is_none());
    }

    #[test]
    fn test_watcher_keeps_settings_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        write_settings(&path, r#"{"volumeDelta": 4}"#, 0);
        let mut watcher = SettingsWatcher::open(path.clone());

        write_settings(&path, "{ not json", 10);
        assert!(watcher.poll().is_none());
        assert_eq!(watcher.current().volume_delta, 4);
    }
}
