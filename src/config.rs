//! Configuration stored as TOML.
//!
//! The file lives in the OS config directory:
//! - Windows: %APPDATA%\headphone-player\config.toml
//! - macOS: ~/Library/Application Support/headphone-player/config.toml
//! - Linux: ~/.config/headphone-player/config.toml
//!
//! Every section is optional; missing keys take their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::liked::JsonLikedStore;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub playback: PlaybackConfig,
    pub visualizer: VisualizerConfig,
    pub library: LibraryConfig,
    pub liked: LikedConfig,
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Position polling period while playing
    pub poll_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

/// Waveform visualizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    /// Minimum time between two published frames
    pub throttle_ms: u64,
    /// Samples per raw capture
    pub capture_size: usize,
    /// Bars per frame
    pub resolution: usize,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 100,
            capture_size: 1024,
            resolution: 32,
        }
    }
}

/// Library settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Folders searched for audio files
    pub paths: Vec<PathBuf>,
}

/// Liked songs settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LikedConfig {
    /// Override for the liked songs file (default: data dir)
    pub path: Option<PathBuf>,
}

impl Config {
    /// Where liked songs are stored, honoring the override.
    pub fn liked_path(&self) -> Option<PathBuf> {
        self.liked.path.clone().or_else(JsonLikedStore::default_path)
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("headphone-player"))
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location.
///
/// Never fails: a missing or broken file yields the defaults.
pub fn load() -> Config {
    match config_path() {
        Some(path) => load_from(&path),
        None => {
            tracing::warn!("Could not determine config directory, using defaults");
            Config::default()
        }
    }
}

/// Load configuration from `path`, falling back to defaults.
pub fn load_from(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Config::default();
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            return Config::default();
        }
    };

    match toml::from_str(&contents) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "Loaded config");
            config
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to parse config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Save configuration to the default location.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)
}

/// Write atomically (write to temp, then rename), creating parent folders.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents)
        .map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_serializes() {
        let toml = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(toml.contains("[playback]"));
        assert!(toml.contains("[visualizer]"));
        assert!(toml.contains("poll_interval_ms = 1000"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
[visualizer]
resolution = 64
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.visualizer.resolution, 64);
        assert_eq!(config.visualizer.throttle_ms, 100);
        assert_eq!(config.visualizer.capture_size, 1024);
        assert_eq!(config.playback.poll_interval_ms, 1000);
        assert!(config.library.paths.is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.library.paths.push(PathBuf::from("/music"));
        config.liked.path = Some(PathBuf::from("/tmp/liked.json"));
        save_to(&config, &path).unwrap();

        assert_eq!(load_from(&path), config);
        assert_eq!(config.liked_path(), Some(PathBuf::from("/tmp/liked.json")));
    }

    #[test]
    fn test_broken_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[playback\npoll_interval_ms = ").unwrap();

        assert_eq!(load_from(&path), Config::default());
        assert_eq!(load_from(&dir.path().join("missing.toml")), Config::default());
    }
}
