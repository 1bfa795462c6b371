//! Per-script indices of everything registered with host collaborators
//!
//! Each registry records what a script registered so the whole set can be
//! reclaimed on unload through the same removal path explicit
//! unregistration uses.

mod command;
mod connection;
mod listener;

pub use command::{CommandRegistry, CommandSpec};
pub use connection::{
    Connection, ConnectionFactory, ConnectionId, ConnectionKind, ConnectionRegistry,
    ConnectionSpec, DisabledConnections,
};
pub use listener::{ListenerRegistry, ScriptListener};
