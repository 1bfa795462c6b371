/// Host runtime that runs script code on a tick-driven main loop
///
/// Scripts register tasks, event listeners, commands and database
/// connections through a [`ScriptApi`] bound to them. The lifecycle
/// registries remember who owns what, so unloading a script reclaims all
/// of it.
pub mod api;
pub mod command_map;
pub mod config;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod exception;
pub mod interpreter;
pub mod lifecycle;
pub mod logger;
pub mod main_loop;
pub mod manager;
#[cfg(feature = "rhai")]
pub mod rhai;
pub mod script_scanner;
pub mod services;
pub mod task;

pub use api::ScriptApi;
pub use command_map::{CommandExecutor, CommandMap, CommandSender, CommandTable};
pub use config::{ConfigLoadError, HostConfig, LoggingConfig, ScriptingConfig};
pub use context::{OwnedResources, ScriptContext, ScriptState};
pub use error::{CommandError, ConnectionError, HostError, ListenerError, ScriptError, TaskError};
pub use event_bus::{Dispatcher, DispatcherHandle, EventBus, ListenerBus};
pub use exception::{ExceptionRouter, ExceptionSink, ScriptExceptionEvent};
pub use interpreter::{Interpreter, NativeScript, ScriptSource};
pub use lifecycle::{
    CommandRegistry, CommandSpec, Connection, ConnectionFactory, ConnectionId, ConnectionKind,
    ConnectionRegistry, ConnectionSpec, DisabledConnections, ListenerRegistry, ScriptListener,
};
pub use logger::ScriptLogger;
pub use main_loop::{LoopHandle, MainLoop, Runnable, TickLoop};
pub use manager::ScriptManager;
pub use script_scanner::{ScanResult, ScriptScanner};
pub use services::{Collaborators, HostServices};
pub use task::{CancelOutcome, TaskId, TaskKind, TaskScheduler, TaskState};
