//! Script lifecycle orchestration

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use tickhost_scripting_api::{ScriptEvent, ScriptEventType};

use crate::api::ScriptApi;
use crate::context::{ScriptContext, ScriptState};
use crate::error::ScriptError;
use crate::exception::ScriptExceptionEvent;
use crate::interpreter::ScriptSource;
use crate::logger::ScriptLogger;
use crate::services::HostServices;

const EVENT_CAPACITY: usize = 256;

/// Loads and unloads scripts and reclaims everything they own
pub struct ScriptManager {
    services: Arc<HostServices>,
    scripts: Mutex<BTreeMap<String, Arc<ScriptContext>>>,
    events: broadcast::Sender<ScriptEvent>,
}

impl ScriptManager {
    pub fn new(services: Arc<HostServices>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let error_events = events.clone();
        services.exceptions.add_sink(move |event: &mut ScriptExceptionEvent| {
            let _ = error_events.send(ScriptEvent {
                script: event.script().to_string(),
                event_type: ScriptEventType::Error {
                    message: format!("{}: {}", event.message(), event.exception()),
                },
            });
        });

        Self {
            services,
            scripts: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    pub fn services(&self) -> &Arc<HostServices> {
        &self.services
    }

    /// Lifecycle notifications for every script
    pub fn subscribe(&self) -> broadcast::Receiver<ScriptEvent> {
        self.events.subscribe()
    }

    fn publish(&self, script: &str, event_type: ScriptEventType) {
        // no subscribers is fine
        let _ = self.events.send(ScriptEvent {
            script: script.to_string(),
            event_type,
        });
    }

    /// Build the script's interpreter and run its top-level code.
    ///
    /// If the top-level code fails, anything it registered is torn down
    /// and the script never becomes `Running`.
    pub fn load(&self, source: &dyn ScriptSource) -> Result<Arc<ScriptContext>, ScriptError> {
        let name = source.name().to_string();
        if self.scripts.lock().contains_key(&name) {
            return Err(ScriptError::AlreadyLoaded(name));
        }

        let interpreter = match source.create_interpreter() {
            Ok(interpreter) => interpreter,
            Err(err) => {
                tracing::error!(
                    target: "scripting",
                    script = name.as_str(),
                    "Failed to create interpreter: {}",
                    err.formatted()
                );
                self.publish(
                    &name,
                    ScriptEventType::LoadFailed {
                        message: err.to_string(),
                    },
                );
                return Err(ScriptError::LoadFailed { name, source: err });
            }
        };
        let logger = ScriptLogger::new(&name, &self.services.logging);
        let context = Arc::new(ScriptContext::new(&name, interpreter, logger, source.config()));

        {
            let mut scripts = self.scripts.lock();
            if scripts.contains_key(&name) {
                return Err(ScriptError::AlreadyLoaded(name));
            }
            scripts.insert(name.clone(), Arc::clone(&context));
        }

        let api = ScriptApi::new(Arc::clone(&context), Arc::clone(&self.services));
        match context.run_main(api) {
            Ok(()) => {
                context.set_state(ScriptState::Running);
                tracing::info!(target: "scripting", script = name.as_str(), "Loaded script");
                self.publish(&name, ScriptEventType::Loaded);
                Ok(context)
            }
            Err(err) => {
                self.services
                    .exceptions
                    .report(&context, &err, "Error when running script");
                self.scripts.lock().remove(&name);
                self.teardown(&context);
                self.publish(
                    &name,
                    ScriptEventType::LoadFailed {
                        message: err.to_string(),
                    },
                );
                Err(ScriptError::LoadFailed { name, source: err })
            }
        }
    }

    pub fn unload(&self, name: &str) -> Result<(), ScriptError> {
        let context = self
            .scripts
            .lock()
            .remove(name)
            .ok_or_else(|| ScriptError::NotLoaded(name.to_string()))?;

        self.teardown(&context);
        tracing::info!(target: "scripting", script = name, "Unloaded script");
        self.publish(name, ScriptEventType::Unloaded);
        Ok(())
    }

    /// Unload the script if it is loaded, then load `source` fresh
    pub fn reload(&self, source: &dyn ScriptSource) -> Result<Arc<ScriptContext>, ScriptError> {
        match self.unload(source.name()) {
            Ok(()) | Err(ScriptError::NotLoaded(_)) => {}
            Err(e) => return Err(e),
        }
        self.load(source)
    }

    /// Unload every script
    pub fn shutdown(&self) {
        let names = self.script_names();
        tracing::info!(target: "scripting", count = names.len(), "Unloading all scripts");
        for name in names.iter().rev() {
            if let Err(e) = self.unload(name) {
                tracing::warn!(target: "scripting", script = name.as_str(), "{}", e);
            }
        }
    }

    pub fn script(&self, name: &str) -> Option<Arc<ScriptContext>> {
        self.scripts.lock().get(name).cloned()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.scripts.lock().contains_key(name)
    }

    /// Loaded script names, sorted
    pub fn script_names(&self) -> Vec<String> {
        self.scripts.lock().keys().cloned().collect()
    }

    /// Stop tasks first since a task body may still register resources,
    /// then release listeners, commands and connections
    fn teardown(&self, context: &ScriptContext) {
        let services = &self.services;
        context.set_state(ScriptState::Unloading);

        services.scheduler.cancel_all_tasks(context.name());
        services.listeners.unregister_all(context);
        services.commands.unregister_all(context);
        if !services.connections.disconnect_all(context) {
            tracing::warn!(
                target: "scripting",
                script = context.name(),
                "Some connections did not close cleanly"
            );
        }
        context.interpreter().close();
        context.set_state(ScriptState::Unloaded);

        let leftover = context.resources();
        if !leftover.is_empty() {
            tracing::debug!(
                target: "scripting",
                script = context.name(),
                ?leftover,
                "Resources still winding down after unload"
            );
        }
    }
}
