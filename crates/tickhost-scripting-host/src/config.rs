use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use tickhost_scripting_api::GuestValue;

const APPLICATION: &str = "tickhost";

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("IO error reading config: {0}")]
    Io(String),
}

/// Top level host configuration (`config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Length of one main-loop tick in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Ticks to wait after startup before scripts are loaded
    #[serde(default = "default_script_load_delay")]
    pub script_load_delay: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub scripting: ScriptingConfig,
}

fn default_tick_interval() -> u64 {
    50
}

fn default_script_load_delay() -> u64 {
    20
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            script_load_delay: default_script_load_delay(),
            logging: LoggingConfig::default(),
            scripting: ScriptingConfig::default(),
        }
    }
}

impl HostConfig {
    /// Default location of the config file
    pub fn config_path() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigLoadError::Io(e.to_string()))?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigLoadError> {
        toml::from_str(content).map_err(|e| ConfigLoadError::Parse(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether each script also gets its own log file
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Minimum level written by script loggers and the console
    #[serde(default = "default_min_log_level")]
    pub min_log_level: String,

    /// `chrono` format string used for script log file timestamps
    #[serde(default = "default_log_timestamp_format")]
    pub log_timestamp_format: String,

    /// Directory for log files (default: <data dir>/logs)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_min_log_level() -> String {
    "info".to_string()
}

pub(crate) fn default_log_timestamp_format() -> String {
    "%b %d %Y %H:%M:%S".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_to_file: true,
            min_log_level: default_min_log_level(),
            log_timestamp_format: default_log_timestamp_format(),
            log_dir: None,
        }
    }
}

impl LoggingConfig {
    /// Console only logging, used by tests and `tickhost check`
    pub fn console_only() -> Self {
        Self {
            log_to_file: false,
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Whether scripting is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory containing scripts (default: <data dir>/scripts)
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Per-script configuration (script name -> config table)
    #[serde(default)]
    pub config: HashMap<String, toml::Value>,

    /// Whether hot reload is enabled
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// Hot reload scan interval in milliseconds
    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,
}

fn default_hot_reload_interval() -> u64 {
    1000
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script_dir: None,
            config: HashMap::new(),
            hot_reload: true,
            hot_reload_interval_ms: default_hot_reload_interval(),
        }
    }
}

impl ScriptingConfig {
    /// Get the script directory path (use provided or default)
    pub fn script_dir(&self) -> PathBuf {
        self.script_dir.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join("scripts"))
                .unwrap_or_else(|| PathBuf::from("scripts"))
        })
    }

    /// Whether the named script may be loaded (default: enabled)
    pub fn is_script_enabled(&self, script: &str) -> bool {
        self.config
            .get(script)
            .and_then(|config| config.get("enabled"))
            .and_then(toml::Value::as_bool)
            .unwrap_or(true)
    }

    /// The per-script table as a guest value (`none` when absent)
    pub fn script_config(&self, script: &str) -> GuestValue {
        self.config
            .get(script)
            .and_then(|value| value.clone().try_into::<GuestValue>().ok())
            .unwrap_or_default()
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APPLICATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = HostConfig::from_toml("").unwrap();
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.script_load_delay, 20);
        assert!(config.logging.log_to_file);
        assert_eq!(config.logging.min_log_level, "info");
        assert!(config.scripting.enabled);
        assert!(config.scripting.hot_reload);
        assert_eq!(config.scripting.hot_reload_interval_ms, 1000);
    }

    #[test]
    fn test_per_script_config() {
        let config = HostConfig::from_toml(
            r#"
            tick_interval_ms = 25

            [scripting.config.greeter]
            enabled = true
            message = "hello"

            [scripting.config.legacy]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.tick_interval_ms, 25);
        assert!(config.scripting.is_script_enabled("greeter"));
        assert!(!config.scripting.is_script_enabled("legacy"));
        assert!(config.scripting.is_script_enabled("unlisted"));

        let greeter = config.scripting.script_config("greeter");
        assert_eq!(greeter.get("message").and_then(GuestValue::as_str), Some("hello"));
        assert!(config.scripting.script_config("unlisted").is_none());
    }

    #[test]
    fn test_parse_error() {
        let err = HostConfig::from_toml("tick_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HostConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::NotFound(_)));
    }
}
