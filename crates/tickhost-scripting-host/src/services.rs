use std::sync::Arc;

use crate::command_map::CommandTable;
use crate::config::LoggingConfig;
use crate::event_bus::EventBus;
use crate::exception::ExceptionRouter;
use crate::lifecycle::{CommandRegistry, ConnectionFactory, ConnectionRegistry, ListenerRegistry};
use crate::main_loop::MainLoop;
use crate::task::TaskScheduler;

/// The host collaborators a script manager needs
pub struct Collaborators {
    pub main_loop: Arc<dyn MainLoop>,
    pub event_bus: Arc<dyn EventBus>,
    pub command_table: Arc<dyn CommandTable>,
    pub connections: Arc<dyn ConnectionFactory>,
}

/// Every registry scripts register into, owned by whoever wires the host
pub struct HostServices {
    pub scheduler: TaskScheduler,
    pub listeners: ListenerRegistry,
    pub commands: CommandRegistry,
    pub connections: ConnectionRegistry,
    pub exceptions: ExceptionRouter,
    pub logging: LoggingConfig,
}

impl HostServices {
    pub fn new(collaborators: Collaborators, logging: LoggingConfig) -> Self {
        let exceptions = ExceptionRouter::new();
        Self {
            scheduler: TaskScheduler::new(collaborators.main_loop, exceptions.clone()),
            listeners: ListenerRegistry::new(collaborators.event_bus, exceptions.clone()),
            commands: CommandRegistry::new(collaborators.command_table, exceptions.clone()),
            connections: ConnectionRegistry::new(collaborators.connections),
            exceptions,
            logging,
        }
    }
}
