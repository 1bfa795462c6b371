use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tickhost_scripting_host::LoggingConfig;

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

/// Initialize host logging for a component (e.g. "host", "check").
///
/// `RUST_LOG` wins over `min_log_level`. With `log_to_file` on, records
/// also go to `<log_dir>/<component>.log`.
///
/// Returns a guard that must be kept alive for the duration of the program.
pub fn init_logging(component: &str, config: &LoggingConfig) -> io::Result<Option<WorkerGuard>> {
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.min_log_level))
    };

    if !config.log_to_file {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .try_init()
            .map_err(io::Error::other)?;
        return Ok(None);
    }

    let log_dir = config.log_dir();
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(format!("{}.log", component));
    truncate_if_needed(&log_path)?;

    let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(io::stdout).with_ansi(true))
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!("Logging to file: {}", log_path.display());
    Ok(Some(guard))
}

/// Truncate log file if it exceeds MAX_LOG_SIZE.
fn truncate_if_needed(log_path: &Path) -> io::Result<()> {
    if log_path.exists() && fs::metadata(log_path)?.len() > MAX_LOG_SIZE {
        File::create(log_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_oversized_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.log");
        fs::write(&path, vec![b'x'; (MAX_LOG_SIZE + 1) as usize]).unwrap();

        truncate_if_needed(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_keeps_small_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.log");
        fs::write(&path, b"recent lines\n").unwrap();

        truncate_if_needed(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "recent lines\n");
    }

    #[test]
    fn test_missing_log_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        truncate_if_needed(&dir.path().join("absent.log")).unwrap();
    }
}
