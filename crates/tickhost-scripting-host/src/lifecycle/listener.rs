use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use tickhost_scripting_api::{EventKind, EventPriority, GuestFn, GuestValue, HostEvent};

use crate::context::ScriptContext;
use crate::error::ListenerError;
use crate::event_bus::{Dispatcher, DispatcherHandle, EventBus};
use crate::exception::ExceptionRouter;

/// A listener a script registered
#[derive(Debug, Clone)]
pub struct ScriptListener {
    pub function: GuestFn,
    pub kind: EventKind,
    pub priority: EventPriority,
    pub ignore_cancelled: bool,
    pub handle: DispatcherHandle,
}

pub struct ListenerRegistry {
    bus: Arc<dyn EventBus>,
    exceptions: ExceptionRouter,
    listeners: Mutex<HashMap<String, Vec<ScriptListener>>>,
}

impl ListenerRegistry {
    pub fn new(bus: Arc<dyn EventBus>, exceptions: ExceptionRouter) -> Self {
        Self {
            bus,
            exceptions,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register `function` for `kind`. A script may listen to each event
    /// kind at most once.
    pub fn register(
        &self,
        script: &Arc<ScriptContext>,
        function: GuestFn,
        kind: EventKind,
        priority: EventPriority,
        ignore_cancelled: bool,
    ) -> Result<DispatcherHandle, ListenerError> {
        let mut listeners = self.listeners.lock();
        if !script.is_accepting() {
            return Err(ListenerError::ScriptNotRunning(script.name().to_string()));
        }
        let owned = listeners.entry(script.name().to_string()).or_default();
        if owned.iter().any(|listener| listener.kind == kind) {
            return Err(ListenerError::DuplicateListener {
                script: script.name().to_string(),
                event: kind,
            });
        }

        let dispatcher = self.dispatcher(script, &function);
        let handle = self.bus.register(kind, priority, ignore_cancelled, dispatcher);
        owned.push(ScriptListener {
            function,
            kind,
            priority,
            ignore_cancelled,
            handle,
        });
        drop(listeners);

        script.with_resources(|resources| resources.listeners.insert(handle));
        tracing::debug!(
            target: "scripting",
            script = script.name(),
            event = %kind,
            priority = %priority,
            "Registered listener"
        );
        Ok(handle)
    }

    /// Remove the listener `script` registered with `function`
    pub fn unregister(&self, script: &ScriptContext, function: &GuestFn) -> Result<(), ListenerError> {
        let listener = {
            let mut listeners = self.listeners.lock();
            let owned = listeners.get_mut(script.name());
            let index = owned
                .as_ref()
                .and_then(|owned| owned.iter().position(|l| l.function.same_function(function)));
            match (owned, index) {
                (Some(owned), Some(index)) => owned.remove(index),
                _ => {
                    return Err(ListenerError::NotRegistered {
                        script: script.name().to_string(),
                        function: function.name().to_string(),
                    })
                }
            }
        };
        self.release(script, &listener);
        Ok(())
    }

    /// Remove every listener owned by `script`, logging collaborator
    /// failures and carrying on
    pub fn unregister_all(&self, script: &ScriptContext) {
        let owned = self.listeners.lock().remove(script.name()).unwrap_or_default();
        for listener in &owned {
            self.release(script, listener);
        }
    }

    pub fn listeners_for(&self, script: &str) -> Vec<ScriptListener> {
        self.listeners.lock().get(script).cloned().unwrap_or_default()
    }

    /// The listener `script` has for `kind`, if any
    pub fn listener_for(&self, script: &str, kind: EventKind) -> Option<ScriptListener> {
        self.listeners
            .lock()
            .get(script)?
            .iter()
            .find(|listener| listener.kind == kind)
            .cloned()
    }

    fn release(&self, script: &ScriptContext, listener: &ScriptListener) {
        if let Err(e) = self.bus.unregister(listener.handle) {
            tracing::warn!(
                target: "scripting",
                script = script.name(),
                event = %listener.kind,
                "Failed to unregister listener: {}",
                e
            );
        }
        script.with_resources(|resources| resources.listeners.remove(&listener.handle));
    }

    fn dispatcher(&self, script: &Arc<ScriptContext>, function: &GuestFn) -> Dispatcher {
        let script = Arc::downgrade(script);
        let function = function.clone();
        let exceptions = self.exceptions.clone();
        Arc::new(move |event: &mut HostEvent| {
            let Some(script) = script.upgrade() else {
                return;
            };
            match script.invoke(&function, &[event.payload().clone()]) {
                Ok(GuestValue::Bool(true)) => {
                    event.set_cancelled(true);
                }
                Ok(_) => {}
                Err(err) => {
                    exceptions.report(&script, &err, "Error when executing event listener");
                }
            }
        })
    }
}
