use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tickhost_scripting_api::{GuestError, GuestFn, GuestResult, GuestValue};

use crate::api::ScriptApi;
use crate::event_bus::DispatcherHandle;
use crate::interpreter::Interpreter;
use crate::lifecycle::ConnectionId;
use crate::logger::ScriptLogger;
use crate::task::TaskId;

/// Lifecycle of a loaded script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Loading,
    Running,
    Unloading,
    Unloaded,
}

impl fmt::Display for ScriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptState::Loading => "loading",
            ScriptState::Running => "running",
            ScriptState::Unloading => "unloading",
            ScriptState::Unloaded => "unloaded",
        };
        f.write_str(name)
    }
}

/// Everything a script currently owns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedResources {
    pub tasks: BTreeSet<TaskId>,
    pub listeners: BTreeSet<DispatcherHandle>,
    pub commands: BTreeSet<String>,
    pub connections: BTreeSet<ConnectionId>,
}

impl OwnedResources {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.listeners.is_empty()
            && self.commands.is_empty()
            && self.connections.is_empty()
    }
}

/// Identity and bookkeeping for one loaded script
pub struct ScriptContext {
    name: String,
    interpreter: Arc<dyn Interpreter>,
    logger: ScriptLogger,
    config: GuestValue,
    state: RwLock<ScriptState>,
    resources: Mutex<OwnedResources>,
    loaded_at: DateTime<Local>,
}

impl ScriptContext {
    pub fn new(
        name: impl Into<String>,
        interpreter: Arc<dyn Interpreter>,
        logger: ScriptLogger,
        config: GuestValue,
    ) -> Self {
        Self {
            name: name.into(),
            interpreter,
            logger,
            config,
            state: RwLock::new(ScriptState::Loading),
            resources: Mutex::new(OwnedResources::default()),
            loaded_at: Local::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.interpreter
    }

    pub fn logger(&self) -> &ScriptLogger {
        &self.logger
    }

    pub fn config(&self) -> &GuestValue {
        &self.config
    }

    pub fn loaded_at(&self) -> DateTime<Local> {
        self.loaded_at
    }

    pub fn state(&self) -> ScriptState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: ScriptState) {
        *self.state.write() = state;
    }

    /// New registrations are only accepted while loading or running
    pub fn is_accepting(&self) -> bool {
        matches!(self.state(), ScriptState::Loading | ScriptState::Running)
    }

    /// Call into guest code; a panic inside the call becomes a guest error
    pub fn invoke(&self, function: &GuestFn, args: &[GuestValue]) -> GuestResult {
        match catch_unwind(AssertUnwindSafe(|| self.interpreter.invoke(function, args))) {
            Ok(result) => result,
            Err(payload) => Err(GuestError::new(panic_message(payload.as_ref())).with_kind("Panic")),
        }
    }

    /// Run the script's top-level code under the same guard as `invoke`
    pub fn run_main(&self, api: ScriptApi) -> GuestResult<()> {
        match catch_unwind(AssertUnwindSafe(|| self.interpreter.run_main(api))) {
            Ok(result) => result,
            Err(payload) => Err(GuestError::new(panic_message(payload.as_ref())).with_kind("Panic")),
        }
    }

    /// Snapshot of the owned resource sets
    pub fn resources(&self) -> OwnedResources {
        self.resources.lock().clone()
    }

    pub(crate) fn with_resources<R>(&self, f: impl FnOnce(&mut OwnedResources) -> R) -> R {
        f(&mut self.resources.lock())
    }
}

impl fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContext")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
