//! The in-process host: reference collaborators plus the script manager

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use tickhost_scripting_api::{EventKind, GuestValue, HostEvent, ScriptEvent, ScriptEventType};
use tickhost_scripting_host::rhai::{load_rhai_scripts, RhaiScript};
use tickhost_scripting_host::script_scanner::script_name;
use tickhost_scripting_host::{
    Collaborators, CommandMap, CommandSender, ConnectionFactory, DisabledConnections,
    HostConfig, HostServices, ListenerBus, ScanResult, ScriptManager, ScriptSource,
    ScriptingConfig, TickLoop,
};

const COMMAND_PREFIX: &str = "tickhost";

/// One host process worth of scripting state
pub struct Host {
    pub main_loop: Arc<TickLoop>,
    pub bus: Arc<ListenerBus>,
    pub commands: Arc<CommandMap>,
    pub manager: ScriptManager,
    scripting: ScriptingConfig,
    script_dir: PathBuf,
    events: broadcast::Receiver<ScriptEvent>,
}

impl Host {
    pub fn new(config: &HostConfig) -> Self {
        Self::with_connections(config, Arc::new(DisabledConnections))
    }

    pub fn with_connections(config: &HostConfig, connections: Arc<dyn ConnectionFactory>) -> Self {
        let main_loop = Arc::new(TickLoop::new());
        let bus = Arc::new(ListenerBus::new());
        let commands = Arc::new(CommandMap::new(COMMAND_PREFIX));
        let services = HostServices::new(
            Collaborators {
                main_loop: main_loop.clone(),
                event_bus: bus.clone(),
                command_table: commands.clone(),
                connections,
            },
            config.logging.clone(),
        );
        let manager = ScriptManager::new(Arc::new(services));
        let events = manager.subscribe();

        Self {
            main_loop,
            bus,
            commands,
            manager,
            scripting: config.scripting.clone(),
            script_dir: config.scripting.script_dir(),
            events,
        }
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Load every enabled script in the script directory. Returns how many
    /// loaded.
    pub fn load_all(&self) -> usize {
        let scripts = match load_rhai_scripts(&self.script_dir, &self.scripting) {
            Ok(scripts) => scripts,
            Err(e) => {
                tracing::error!(target: "scripting", "Failed to read scripts: {:#}", e);
                return 0;
            }
        };

        scripts
            .iter()
            .filter(|script| match self.manager.load(*script) {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(target: "scripting", "{}", e);
                    false
                }
            })
            .count()
    }

    /// Unload everything and load the directory again
    pub fn reload_all(&self) -> usize {
        self.manager.shutdown();
        self.load_all()
    }

    /// Bring loaded scripts in line with a script directory scan
    pub fn apply_changes(&self, changes: &ScanResult) {
        for path in &changes.removed {
            let Some(name) = script_name(path) else {
                continue;
            };
            if let Err(e) = self.manager.unload(&name) {
                tracing::debug!(target: "scripting", "{}", e);
            }
        }

        for path in changes.added.iter().chain(&changes.changed) {
            self.reload_file(path);
        }
    }

    fn reload_file(&self, path: &Path) {
        let script = match RhaiScript::from_file(path) {
            Ok(script) => script,
            Err(e) => {
                tracing::error!(
                    target: "scripting",
                    "Failed to read script {}: {}",
                    path.display(),
                    e
                );
                return;
            }
        };
        let name = script.name().to_string();
        if !self.scripting.is_script_enabled(&name) {
            return;
        }
        let script = script.with_config(self.scripting.script_config(&name));
        tracing::info!(target: "scripting", script = name.as_str(), "Reloading changed script");
        if let Err(e) = self.manager.reload(&script) {
            tracing::error!(target: "scripting", "{}", e);
        }
    }

    /// Announce script lifecycle changes on the event bus
    pub fn publish_lifecycle_events(&mut self) {
        loop {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "scripting", skipped, "Missed script lifecycle events");
                    continue;
                }
                Err(_) => return,
            };

            let kind = match event.event_type {
                ScriptEventType::Loaded => EventKind::ScriptPostLoad,
                ScriptEventType::Unloaded => EventKind::ScriptUnload,
                _ => continue,
            };
            let payload = GuestValue::map([("script", GuestValue::from(event.script))]);
            self.bus.fire(&mut HostEvent::new(kind, payload));
        }
    }

    /// Run one console line. Returns `false` if no command matched.
    pub fn dispatch(&self, sender: &dyn CommandSender, line: &str) -> bool {
        let handled = self.commands.dispatch(sender, line);
        if !handled {
            sender.send_message(&format!("Unknown command: {}", line.trim()));
        }
        handled
    }
}
