//! What script code can call
//!
//! A `ScriptApi` is bound to one script when it is created, so everything
//! registered through it is attributed to that script.

use std::fmt::Display;
use std::sync::Arc;

use tickhost_scripting_api::{EventKind, EventPriority, GuestFn, GuestValue};

use crate::context::ScriptContext;
use crate::error::{CommandError, ConnectionError, ListenerError, TaskError};
use crate::event_bus::DispatcherHandle;
use crate::lifecycle::{CommandSpec, ConnectionId, ConnectionSpec};
use crate::logger::ScriptLogger;
use crate::services::HostServices;
use crate::task::{CancelOutcome, TaskId, TaskScheduler};

#[derive(Clone)]
pub struct ScriptApi {
    script: Arc<ScriptContext>,
    services: Arc<HostServices>,
}

impl ScriptApi {
    pub fn new(script: Arc<ScriptContext>, services: Arc<HostServices>) -> Self {
        Self { script, services }
    }

    pub fn script(&self) -> &Arc<ScriptContext> {
        &self.script
    }

    pub fn script_name(&self) -> &str {
        self.script.name()
    }

    pub fn logger(&self) -> &ScriptLogger {
        self.script.logger()
    }

    /// This script's table from `[scripting.config.<name>]`
    pub fn script_config(&self) -> &GuestValue {
        self.script.config()
    }

    /// Configuration errors go to the script's log before being returned
    fn checked<T, E: Display>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            self.script.logger().error(&e.to_string());
        }
        result
    }

    pub fn run_sync(
        &self,
        function: GuestFn,
        args: Vec<GuestValue>,
        delay: i64,
        interval: i64,
    ) -> Result<TaskId, TaskError> {
        let result = self
            .services
            .scheduler
            .schedule_sync(&self.script, function, args, delay, interval);
        self.checked(result)
    }

    pub fn run_async(&self, function: GuestFn, args: Vec<GuestValue>, delay: i64) -> Result<TaskId, TaskError> {
        let result = self.services.scheduler.schedule_async(&self.script, function, args, delay);
        self.checked(result)
    }

    pub fn run_async_callback(
        &self,
        function: GuestFn,
        args: Vec<GuestValue>,
        callback: GuestFn,
        delay: i64,
    ) -> Result<TaskId, TaskError> {
        let result = self.services.scheduler.schedule_async_with_callback(
            &self.script,
            function,
            args,
            callback,
            delay,
        );
        self.checked(result)
    }

    pub fn cancel_task(&self, id: TaskId) -> CancelOutcome {
        self.services.scheduler.cancel_task(id)
    }

    /// Whether `id` was cancelled or has already finished. Long-running
    /// async bodies poll this to stop cooperatively.
    pub fn is_task_cancelled(&self, id: TaskId) -> bool {
        self.services.scheduler.is_cancelled(id)
    }

    /// The task running on the calling thread, if guest code was entered
    /// through one
    pub fn current_task(&self) -> Option<TaskId> {
        TaskScheduler::current_task()
    }

    /// Run on the next tick
    pub fn run_task(&self, function: GuestFn, args: Vec<GuestValue>) -> Result<TaskId, TaskError> {
        self.run_sync(function, args, 0, 0)
    }

    pub fn run_task_later(&self, function: GuestFn, delay: i64, args: Vec<GuestValue>) -> Result<TaskId, TaskError> {
        self.run_sync(function, args, delay, 0)
    }

    pub fn run_task_timer(
        &self,
        function: GuestFn,
        delay: i64,
        interval: i64,
        args: Vec<GuestValue>,
    ) -> Result<TaskId, TaskError> {
        self.run_sync(function, args, delay, interval)
    }

    pub fn run_task_async(&self, function: GuestFn, args: Vec<GuestValue>) -> Result<TaskId, TaskError> {
        self.run_async(function, args, 0)
    }

    pub fn run_sync_callback_task(
        &self,
        function: GuestFn,
        callback: GuestFn,
        args: Vec<GuestValue>,
    ) -> Result<TaskId, TaskError> {
        self.run_async_callback(function, args, callback, 0)
    }

    pub fn register_listener(
        &self,
        function: GuestFn,
        kind: EventKind,
        priority: EventPriority,
        ignore_cancelled: bool,
    ) -> Result<DispatcherHandle, ListenerError> {
        let result = self
            .services
            .listeners
            .register(&self.script, function, kind, priority, ignore_cancelled);
        self.checked(result)
    }

    pub fn unregister_listener(&self, function: &GuestFn) -> Result<(), ListenerError> {
        let result = self.services.listeners.unregister(&self.script, function);
        self.checked(result)
    }

    pub fn register_command(&self, spec: CommandSpec) -> Result<(), CommandError> {
        let result = self.services.commands.register(&self.script, spec);
        self.checked(result)
    }

    pub fn unregister_command(&self, name: &str) -> Result<(), CommandError> {
        let result = self.services.commands.unregister(&self.script, name);
        self.checked(result)
    }

    /// Open a database connection owned by this script
    pub fn connect(&self, spec: &ConnectionSpec) -> Result<ConnectionId, ConnectionError> {
        self.services.connections.connect(&self.script, spec)
    }

    pub fn disconnect(&self, id: ConnectionId) -> Result<bool, ConnectionError> {
        let result = self.services.connections.disconnect(&self.script, id);
        self.checked(result)
    }
}
