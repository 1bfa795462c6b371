use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use tickhost_runner::{check_script, init_logging, HostRunner};
use tickhost_scripting_host::{ConfigLoadError, HostConfig, LoggingConfig};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the host and its scripts until Ctrl-C
    Run {
        /// Config file (default: the per-user config path)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Script directory, overriding the config file
        #[arg(short, long)]
        script_dir: Option<PathBuf>,

        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Load one script and report whether its top-level code runs
    Check {
        file: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

const EXAMPLE_CONFIG: &str = r#"# tickhost configuration

tick_interval_ms = 50
script_load_delay = 20

[logging]
log_to_file = true
min_log_level = "info"

[scripting]
enabled = true
hot_reload = true

# Per-script settings, visible to the script through script_config()
# [scripting.config.greeter]
# enabled = true
# greeting = "hello"
"#;

/// Load the given config file, or the default one, writing an example
/// config when the default does not exist yet
fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    if let Some(path) = path {
        return HostConfig::load_from(path)
            .with_context(|| format!("Loading config {}", path.display()));
    }

    match HostConfig::load() {
        Ok(config) => Ok(config),
        Err(ConfigLoadError::NotFound(path)) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, EXAMPLE_CONFIG)
                .with_context(|| format!("Writing example config {}", path.display()))?;
            eprintln!("Created example config at: {}", path.display());
            Ok(HostConfig::default())
        }
        Err(e) => Err(e).context("Loading default config"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            script_dir,
            ticks,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = script_dir {
                config.scripting.script_dir = Some(dir);
            }
            let _guard = init_logging("host", &config.logging)?;
            info!("Starting tickhost...");

            // the main loop must stay on one thread
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let reason = runtime.block_on(HostRunner::new(config).with_max_ticks(ticks).run())?;
            info!("Stopped: {:?}", reason);
            Ok(())
        }
        Command::Check { file, config } => {
            let config = match config {
                Some(path) => load_config(Some(&path))?,
                None => HostConfig::default(),
            };
            let logging = LoggingConfig {
                log_to_file: false,
                ..config.logging.clone()
            };
            let _guard = init_logging("check", &logging)?;

            check_script(&file, &HostConfig { logging, ..config })?;
            println!("{}: ok", file.display());
            Ok(())
        }
    }
}
