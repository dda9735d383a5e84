//! Configuration management for narrata
//!
//! Handles loading and validation of narrata.toml configuration files.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::mode::SkipMode;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "NARRATA_CONFIG";

/// File name searched in the working and user config directories.
pub const CONFIG_FILE_NAME: &str = "narrata.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Playback settings
    #[serde(default)]
    pub player: PlayerConfig,

    /// Rollback snapshot settings
    #[serde(default)]
    pub rollback: RollbackConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory searched for `<script>.json` when a goto names a script
    /// that was not loaded up front
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Label to start from when none is given on the command line
    #[serde(default)]
    pub start_label: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            start_label: None,
        }
    }
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Player configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Which commands skip may fast-forward through
    #[serde(default)]
    pub skip_mode: SkipMode,

    /// Minimum time a line stays up under auto-play
    #[serde(default = "default_auto_play_delay_ms")]
    pub auto_play_delay_ms: u64,

    /// How often auto-play re-checks whether voice audio finished
    #[serde(default = "default_voice_poll_ms")]
    pub voice_poll_ms: u64,

    /// Fixed seed for `random` blocks; OS entropy when unset
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Capacity of the player event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            skip_mode: SkipMode::default(),
            auto_play_delay_ms: default_auto_play_delay_ms(),
            voice_poll_ms: default_voice_poll_ms(),
            rng_seed: None,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_auto_play_delay_ms() -> u64 {
    1500
}

fn default_voice_poll_ms() -> u64 {
    50
}

fn default_event_capacity() -> usize {
    256
}

/// Rollback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Maximum retained snapshots; oldest are evicted first
    #[serde(default = "default_rollback_capacity")]
    pub capacity: usize,

    /// Snapshot before every main-context command instead of only at
    /// wait-for-input points
    #[serde(default = "default_true")]
    pub capture_every_command: bool,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            capacity: default_rollback_capacity(),
            capture_every_command: true,
        }
    }
}

fn default_rollback_capacity() -> usize {
    128
}

fn default_true() -> bool {
    true
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "unknown log format: {s}. Expected one of: pretty, json"
            )),
        }
    }
}

impl Config {
    /// Load configuration, searching the standard locations.
    ///
    /// Falls back to defaults when no file exists anywhere.
    pub fn load(explicit: Option<&Path>) -> crate::Result<Self> {
        match resolve_config_path(explicit) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(text).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the player cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.player.voice_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "player.voice_poll_ms must be greater than zero".to_string(),
            ));
        }
        if self.player.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "player.event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.rollback.capacity == 0 {
            return Err(ConfigError::Invalid(
                "rollback.capacity must be greater than zero".to_string(),
            ));
        }
        self.logging
            .level
            .parse::<crate::logging::LogLevel>()
            .map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

/// Locate the config file: explicit path, `NARRATA_CONFIG`, `./narrata.toml`,
/// then the user config directory.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_config_path_with(
        explicit,
        std::env::var_os(CONFIG_ENV),
        &cwd,
        dirs::config_dir(),
    )
}

fn resolve_config_path_with(
    explicit: Option<&Path>,
    env: Option<OsString>,
    cwd: &Path,
    config_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let local = cwd.join(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    config_dir
        .map(|dir| dir.join("narrata").join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.player.skip_mode, SkipMode::ReadOnly);
        assert_eq!(config.player.auto_play_delay_ms, 1500);
        assert_eq!(config.rollback.capacity, 128);
        assert!(config.rollback.capture_every_command);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [player]
            skip_mode = "everything"
            rng_seed = 42

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.player.skip_mode, SkipMode::Everything);
        assert_eq!(config.player.rng_seed, Some(42));
        assert_eq!(config.player.voice_poll_ms, 50);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Config::from_toml_str("[rollback]\ncapacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("rollback.capacity"));
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let err = Config::from_toml_str("[logging]\nlevel = \"loud\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown log level"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::from_toml_str("[player\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom.toml");
        let resolved = resolve_config_path_with(
            Some(&explicit),
            Some(OsString::from("/elsewhere.toml")),
            dir.path(),
            None,
        );
        assert_eq!(resolved, Some(explicit));
    }

    #[test]
    fn env_beats_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        let resolved = resolve_config_path_with(
            None,
            Some(OsString::from("/from/env.toml")),
            dir.path(),
            None,
        );
        assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));
    }

    #[test]
    fn falls_back_to_user_config_dir() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let user = home.path().join("narrata");
        std::fs::create_dir_all(&user).unwrap();
        std::fs::write(user.join(CONFIG_FILE_NAME), "").unwrap();
        let resolved =
            resolve_config_path_with(None, None, cwd.path(), Some(home.path().to_path_buf()));
        assert_eq!(resolved, Some(user.join(CONFIG_FILE_NAME)));
        assert!(resolve_config_path_with(None, None, cwd.path(), None).is_none());
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[player]\nauto_play_delay_ms = 10\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.player.auto_play_delay_ms, 10);
    }

    #[test]
    fn missing_explicit_file_is_a_read_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, crate::Error::Config(ConfigError::Read { .. })));
    }
}
