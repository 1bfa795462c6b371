//! Per-script logging
//!
//! Every script gets its own logger. Records always go through `tracing`
//! (target `script`) and, when file logging is enabled, are appended to
//! `<log_dir>/<script>.log` with a local timestamp.

use chrono::format::{Item, StrftimeItems};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

use crate::config::{default_log_timestamp_format, LoggingConfig};

pub struct ScriptLogger {
    script: String,
    min_level: Level,
    timestamp_format: String,
    file: Option<LogFile>,
}

struct LogFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl ScriptLogger {
    /// Create the logger for a script; falls back to console only logging
    /// when the log file cannot be opened
    pub fn new(script: &str, config: &LoggingConfig) -> Self {
        let min_level = Level::from_str(&config.min_log_level).unwrap_or(Level::INFO);

        let file = if config.log_to_file {
            match LogFile::open(&config.log_dir(), script) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!(
                        target: "scripting",
                        "Failed to open log file for script {}: {}",
                        script,
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        let timestamp_format = if is_valid_format(&config.log_timestamp_format) {
            config.log_timestamp_format.clone()
        } else {
            tracing::warn!(
                target: "scripting",
                "Invalid log timestamp format '{}', using the default",
                config.log_timestamp_format
            );
            default_log_timestamp_format()
        };

        Self {
            script: script.to_string(),
            min_level,
            timestamp_format,
            file,
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|file| file.path.as_path())
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        level <= self.min_level
    }

    pub fn log(&self, level: Level, message: &str) {
        if !self.is_enabled(level) {
            return;
        }

        let script = self.script.as_str();
        match level {
            Level::ERROR => tracing::error!(target: "script", script, "{}", message),
            Level::WARN => tracing::warn!(target: "script", script, "{}", message),
            Level::INFO => tracing::info!(target: "script", script, "{}", message),
            Level::DEBUG => tracing::debug!(target: "script", script, "{}", message),
            _ => tracing::trace!(target: "script", script, "{}", message),
        }
        self.append(level, message);
    }

    /// Write to the script's log file only, skipping the console
    pub fn append(&self, level: Level, message: &str) {
        if !self.is_enabled(level) {
            return;
        }
        if let Some(file) = &self.file {
            let timestamp = self.timestamp();
            let mut writer = file.writer.lock();
            let written = writeln!(writer, "[{}] [{}] {}", timestamp, level, message)
                .and_then(|_| writer.flush());
            if let Err(e) = written {
                tracing::warn!(
                    target: "scripting",
                    "Failed to write log file {}: {}",
                    file.path.display(),
                    e
                );
            }
        }
    }

    fn timestamp(&self) -> String {
        let now = chrono::Local::now();
        let mut timestamp = String::new();
        if write!(timestamp, "{}", now.format(&self.timestamp_format)).is_err() {
            timestamp = now.to_rfc3339();
        }
        timestamp
    }

    pub fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }
}

impl LogFile {
    fn open(dir: &Path, script: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", log_file_stem(script)));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

fn is_valid_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Script names may contain path separators when they come from nested
/// directories; keep the log file flat
fn log_file_stem(script: &str) -> String {
    script
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config(dir: &Path, level: &str) -> LoggingConfig {
        LoggingConfig {
            log_to_file: true,
            min_log_level: level.to_string(),
            log_timestamp_format: "%H:%M:%S".to_string(),
            log_dir: Some(dir.to_path_buf()),
        }
    }

    #[test]
    fn test_writes_to_script_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ScriptLogger::new("greeter", &file_config(dir.path(), "info"));

        logger.info("hello");
        logger.error("broken");

        let path = logger.log_path().unwrap().to_path_buf();
        assert_eq!(path, dir.path().join("greeter.log"));
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("[INFO] hello"));
        assert!(contents.contains("[ERROR] broken"));
    }

    #[test]
    fn test_drops_records_below_min_level() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ScriptLogger::new("quiet", &file_config(dir.path(), "warn"));

        logger.info("ignored");
        logger.debug("ignored too");
        logger.warn("kept");

        let contents = fs::read_to_string(logger.log_path().unwrap()).unwrap();
        assert!(!contents.contains("ignored"));
        assert!(contents.contains("[WARN] kept"));
    }

    #[test]
    fn test_console_only() {
        let logger = ScriptLogger::new("console", &LoggingConfig::console_only());
        assert!(logger.log_path().is_none());
        logger.info("only traced");
    }

    #[test]
    fn test_invalid_timestamp_format_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            log_timestamp_format: "%Q".to_string(),
            ..file_config(dir.path(), "info")
        };
        let logger = ScriptLogger::new("odd-format", &config);

        logger.info("still written");

        let contents = fs::read_to_string(logger.log_path().unwrap()).unwrap();
        assert!(contents.contains("[INFO] still written"));
        assert!(!contents.contains("%Q"));
    }

    #[test]
    fn test_format_validation() {
        assert!(is_valid_format("%b %d %Y %H:%M:%S"));
        assert!(!is_valid_format("%Q"));
    }

    #[test]
    fn test_nested_script_names_stay_flat() {
        assert_eq!(log_file_stem("utils/helpers"), "utils_helpers");
    }
}
