// Shared harness for the scripting host integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tickhost_scripting_host::{
    Collaborators, CommandMap, CommandSender, ConnectionFactory, DisabledConnections,
    HostServices, ListenerBus, LoggingConfig, NativeScript, ScriptApi, ScriptManager, TickLoop,
};

pub struct Harness {
    pub main_loop: Arc<TickLoop>,
    pub bus: Arc<ListenerBus>,
    pub commands: Arc<CommandMap>,
    pub manager: ScriptManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_connections(Arc::new(DisabledConnections))
    }

    pub fn with_connections(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::build(factory, LoggingConfig::console_only())
    }

    pub fn with_logging(logging: LoggingConfig) -> Self {
        Self::build(Arc::new(DisabledConnections), logging)
    }

    pub fn build(factory: Arc<dyn ConnectionFactory>, logging: LoggingConfig) -> Self {
        let main_loop = Arc::new(TickLoop::new());
        let bus = Arc::new(ListenerBus::new());
        let commands = Arc::new(CommandMap::new("tickhost"));
        let services = HostServices::new(
            Collaborators {
                main_loop: main_loop.clone(),
                event_bus: bus.clone(),
                command_table: commands.clone(),
                connections: factory,
            },
            logging,
        );
        Self {
            main_loop,
            bus,
            commands,
            manager: ScriptManager::new(Arc::new(services)),
        }
    }

    pub fn services(&self) -> &HostServices {
        self.manager.services()
    }

    /// Load a native script that does nothing but hand back its API
    pub fn empty_script(&self, name: &str) -> ScriptApi {
        let captured: Arc<Mutex<Option<ScriptApi>>> = Arc::new(Mutex::new(None));
        let slot = captured.clone();
        self.manager
            .load(&NativeScript::new(name, move |api| {
                *slot.lock() = Some(api.clone());
                Ok(())
            }))
            .expect("native script should load");
        let api = captured.lock().take();
        api.expect("main should have run")
    }

    /// Tick the loop until `done` holds, panicking after two seconds
    pub fn tick_until(&self, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            self.main_loop.tick();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn ticks(&self, n: usize) {
        for _ in 0..n {
            self.main_loop.tick();
        }
    }
}

/// Command sender that records every message it receives
#[derive(Default)]
pub struct Console {
    pub messages: Mutex<Vec<String>>,
    pub denied: bool,
}

impl Console {
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl CommandSender for Console {
    fn name(&self) -> &str {
        "console"
    }

    fn send_message(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn has_permission(&self, _permission: &str) -> bool {
        !self.denied
    }
}
