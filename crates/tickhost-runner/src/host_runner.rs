//! Drives the host main loop on a single-threaded tokio runtime

use anyhow::Context;
use std::future::pending;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::info;

use tickhost_scripting_host::rhai::RhaiScript;
use tickhost_scripting_host::{HostConfig, ScriptScanner, ScriptSource};

use crate::console::{spawn_stdin_reader, ConsoleSender};
use crate::host::Host;
use crate::reload::setup_reload_signal;

/// Why the runner stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    CtrlC,
    TickLimit,
}

pub struct HostRunner {
    config: HostConfig,
    max_ticks: Option<u64>,
    console: bool,
}

impl HostRunner {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            max_ticks: None,
            console: true,
        }
    }

    /// Stop after this many ticks instead of waiting for Ctrl-C
    pub fn with_max_ticks(mut self, ticks: Option<u64>) -> Self {
        self.max_ticks = ticks;
        self
    }

    /// Whether stdin lines are dispatched as console commands
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// Run until Ctrl-C or the tick limit, then unload every script.
    ///
    /// The calling thread becomes the main thread, so this must run on a
    /// current-thread runtime.
    pub async fn run(self) -> anyhow::Result<StopReason> {
        let mut host = Host::new(&self.config);
        if self.config.scripting.enabled {
            std::fs::create_dir_all(host.script_dir()).with_context(|| {
                format!("Creating script directory {}", host.script_dir().display())
            })?;
        }
        let reason = self.drive(&mut host).await;

        host.manager.shutdown();
        host.publish_lifecycle_events();
        info!("Host stopped after {} ticks", host.main_loop.current_tick());
        Ok(reason)
    }

    async fn drive(&self, host: &mut Host) -> StopReason {
        let scripting = &self.config.scripting;
        let tick_length = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(tick_length);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut console: Option<mpsc::UnboundedReceiver<String>> =
            self.console.then(spawn_stdin_reader);
        let mut reload: Option<watch::Receiver<u64>> = Some(setup_reload_signal());
        let mut scanner: Option<ScriptScanner> = None;
        let load_at = self.config.script_load_delay.max(1);

        if scripting.enabled {
            info!(
                "Loading scripts from {} in {} ticks",
                host.script_dir().display(),
                load_at
            );
        } else {
            info!("Scripting is disabled");
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    host.main_loop.tick();
                    let tick = host.main_loop.current_tick();

                    if scripting.enabled && tick == load_at {
                        let loaded = host.load_all();
                        info!("Loaded {} script(s)", loaded);
                        if scripting.hot_reload {
                            scanner = Some(ScriptScanner::new(
                                host.script_dir(),
                                Duration::from_millis(scripting.hot_reload_interval_ms),
                            ));
                        }
                    }

                    if let Some(scanner) = scanner.as_mut() {
                        if scanner.should_scan() {
                            let changes = scanner.scan();
                            if changes.has_changes() {
                                host.apply_changes(&changes);
                            }
                        }
                    }

                    host.publish_lifecycle_events();

                    if self.max_ticks.is_some_and(|max| tick >= max) {
                        info!("Reached tick limit of {}", tick);
                        return StopReason::TickLimit;
                    }
                }
                line = async {
                    match console.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => pending().await,
                    }
                } => {
                    match line {
                        Some(line) => {
                            host.dispatch(&ConsoleSender, &line);
                        }
                        None => console = None,
                    }
                }
                changed = async {
                    match reload.as_mut() {
                        Some(rx) => rx.changed().await,
                        None => pending().await,
                    }
                } => {
                    match changed {
                        Ok(()) if scripting.enabled => {
                            let loaded = host.reload_all();
                            info!("Reloaded {} script(s)", loaded);
                        }
                        Ok(()) => {}
                        Err(_) => reload = None,
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    return StopReason::CtrlC;
                }
            }
        }
    }
}

/// Load one script against a private host and report whether its top-level
/// code runs. Used by `tickhost check`.
pub fn check_script(path: &Path, config: &HostConfig) -> anyhow::Result<()> {
    let script = RhaiScript::from_file(path)
        .with_context(|| format!("Reading script {}", path.display()))?;
    let name = script.name().to_string();
    let script = script.with_config(config.scripting.script_config(&name));

    let host = Host::new(config);
    let loaded = host.manager.load(&script);
    // let work queued by the top-level code reach the main loop once
    host.main_loop.tick();
    host.manager.shutdown();
    loaded.map(|_| ()).with_context(|| format!("Script {} failed", name))
}
