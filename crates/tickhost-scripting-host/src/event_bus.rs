//! Event-bus primitive
//!
//! Registrations are keyed by [`EventKind`] and checked once when they are
//! added, so firing never inspects event types at runtime.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tickhost_scripting_api::{EventKind, EventPriority, HostEvent};

use crate::context::panic_message;
use crate::error::HostError;

/// Called with the event on the main thread
pub type Dispatcher = Arc<dyn Fn(&mut HostEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatcherHandle(u64);

impl DispatcherHandle {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DispatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

pub trait EventBus: Send + Sync + 'static {
    fn register(
        &self,
        kind: EventKind,
        priority: EventPriority,
        ignore_cancelled: bool,
        dispatcher: Dispatcher,
    ) -> DispatcherHandle;

    fn unregister(&self, handle: DispatcherHandle) -> Result<(), HostError>;
}

struct Registration {
    handle: DispatcherHandle,
    priority: EventPriority,
    ignore_cancelled: bool,
    dispatcher: Dispatcher,
}

/// In-process event bus ordered by priority, then registration order
#[derive(Default)]
pub struct ListenerBus {
    table: RwLock<HashMap<EventKind, Vec<Registration>>>,
    next_handle: AtomicU64,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every registered dispatcher. Returns how many
    /// dispatchers were called.
    pub fn fire(&self, event: &mut HostEvent) -> usize {
        let dispatchers: Vec<(bool, Dispatcher)> = match self.table.read().get(&event.kind()) {
            Some(registrations) => registrations
                .iter()
                .map(|r| (r.ignore_cancelled, Arc::clone(&r.dispatcher)))
                .collect(),
            None => return 0,
        };

        let mut called = 0;
        for (ignore_cancelled, dispatcher) in dispatchers {
            if ignore_cancelled && event.is_cancelled() {
                continue;
            }
            called += 1;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| dispatcher(event))) {
                tracing::error!(
                    event = %event.kind(),
                    "Event dispatcher panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        called
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.table.read().get(&kind).map_or(0, Vec::len)
    }
}

impl EventBus for ListenerBus {
    fn register(
        &self,
        kind: EventKind,
        priority: EventPriority,
        ignore_cancelled: bool,
        dispatcher: Dispatcher,
    ) -> DispatcherHandle {
        let handle = DispatcherHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut table = self.table.write();
        let registrations = table.entry(kind).or_default();
        let index = registrations.partition_point(|r| r.priority <= priority);
        registrations.insert(
            index,
            Registration {
                handle,
                priority,
                ignore_cancelled,
                dispatcher,
            },
        );
        handle
    }

    fn unregister(&self, handle: DispatcherHandle) -> Result<(), HostError> {
        let mut table = self.table.write();
        for registrations in table.values_mut() {
            if let Some(index) = registrations.iter().position(|r| r.handle == handle) {
                registrations.remove(index);
                return Ok(());
            }
        }
        Err(HostError::UnknownHandle(handle.0))
    }
}
