//! Error types for the scripting host
//!
//! Configuration errors are returned to the calling script; guest runtime
//! errors never show up here because they are routed to the exception
//! router instead.

use tickhost_scripting_api::{EventKind, GuestError};

use crate::task::TaskId;

/// Failure reported by an external collaborator (main loop, event bus,
/// command table, database driver)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("handle {0} is not registered")]
    UnknownHandle(u64),
    #[error("command label '{0}' is already taken")]
    LabelTaken(String),
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("invalid schedule: delay ({delay}) and interval ({interval}) must not be negative")]
    InvalidSchedule { delay: i64, interval: i64 },
    #[error("script '{0}' is not accepting new tasks")]
    ScriptNotRunning(String),
    #[error("task {0} could not be started: {1}")]
    Spawn(TaskId, String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error("script '{script}' already has a listener for {event}")]
    DuplicateListener { script: String, event: EventKind },
    #[error("function '{function}' is not registered as a listener by script '{script}'")]
    NotRegistered { script: String, function: String },
    #[error("script '{0}' is not accepting new listeners")]
    ScriptNotRunning(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("script '{script}' already registered command '{name}'")]
    AlreadyRegistered { script: String, name: String },
    #[error("command '{name}' is not registered by script '{script}'")]
    NotRegistered { script: String, name: String },
    #[error("command table rejected '{name}': {source}")]
    Host { name: String, source: HostError },
    #[error("script '{0}' is not accepting new commands")]
    ScriptNotRunning(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to open a connection to the {kind} database ({uri}): {source}")]
    Open {
        kind: String,
        uri: String,
        source: HostError,
    },
    #[error("connection {0} is not owned by this script")]
    NotFound(u64),
    #[error("script '{0}' is not accepting new connections")]
    ScriptNotRunning(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("script '{0}' is already loaded")]
    AlreadyLoaded(String),
    #[error("script '{0}' is not loaded")]
    NotLoaded(String),
    #[error("script '{name}' failed to load: {source}")]
    LoadFailed { name: String, source: GuestError },
}
