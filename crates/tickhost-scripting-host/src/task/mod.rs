//! Scheduled units of guest work

mod scheduler;

pub use scheduler::TaskScheduler;

use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use tickhost_scripting_api::{GuestFn, GuestValue};

use crate::context::ScriptContext;
use crate::main_loop::LoopHandle;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
}

struct Current {
    task: Arc<Task>,
    interruptible: bool,
}

/// The task whose guest code is running on the calling thread
pub fn current_task() -> Option<TaskId> {
    CURRENT.with(|current| current.borrow().as_ref().map(|current| current.task.id))
}

/// Whether the guest code on this thread belongs to an async body that has
/// been cancelled. Guest backends poll this to stop long-running bodies.
pub(crate) fn cancellation_requested() -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|current| current.interruptible && current.task.is_cancelled())
    })
}

/// Marks `task` as the current task until dropped
pub(crate) struct CurrentTask {
    previous: Option<Current>,
}

impl CurrentTask {
    pub(crate) fn enter(task: &Arc<Task>, interruptible: bool) -> Self {
        let entered = Current {
            task: Arc::clone(task),
            interruptible,
        };
        let previous = CURRENT.with(|current| current.replace(Some(entered)));
        Self { previous }
    }
}

impl Drop for CurrentTask {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Process-wide task identifier, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        TaskId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Runs on the main thread, optionally delayed and repeating
    Sync,
    /// One-shot body on a dedicated worker thread
    Async,
    /// Async body whose result is handed to a callback on the main thread
    SyncCallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Scheduled,
    Running,
    AwaitingCallback,
    Finished,
}

/// Result of [`TaskScheduler::cancel_task`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Still winding down after an earlier cancel
    AlreadyCancelled,
    NotFound,
}

struct Status {
    state: TaskState,
    thread: Option<ThreadId>,
}

pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) script: Weak<ScriptContext>,
    pub(crate) script_name: String,
    pub(crate) kind: TaskKind,
    pub(crate) function: GuestFn,
    pub(crate) callback_fn: Option<GuestFn>,
    pub(crate) args: Vec<GuestValue>,
    pub(crate) interval: u64,
    cancelled: AtomicBool,
    status: Mutex<Status>,
    /// Held while the main loop is asked to schedule this task
    pub(crate) loop_handle: Mutex<Option<LoopHandle>>,
    pub(crate) callback: Mutex<Option<Arc<Callback>>>,
    pub(crate) handoff: Handoff,
}

impl Task {
    pub(crate) fn new(
        script: &Arc<ScriptContext>,
        kind: TaskKind,
        function: GuestFn,
        callback_fn: Option<GuestFn>,
        args: Vec<GuestValue>,
        interval: u64,
    ) -> Self {
        Self {
            id: TaskId::next(),
            script: Arc::downgrade(script),
            script_name: script.name().to_string(),
            kind,
            function,
            callback_fn,
            args,
            interval,
            cancelled: AtomicBool::new(false),
            status: Mutex::new(Status {
                state: TaskState::Scheduled,
                thread: None,
            }),
            loop_handle: Mutex::new(None),
            callback: Mutex::new(None),
            handoff: Handoff::default(),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Set the cancel flag, returning whether it was already set
    pub(crate) fn mark_cancelled(&self) -> bool {
        self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> TaskState {
        self.status.lock().state
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        let mut status = self.status.lock();
        if status.state != TaskState::Finished {
            status.state = state;
        }
    }

    /// Move to `Running` on the current thread unless cancelled or finished
    pub(crate) fn begin_run(&self) -> bool {
        let mut status = self.status.lock();
        if self.is_cancelled() || status.state == TaskState::Finished {
            return false;
        }
        status.state = TaskState::Running;
        status.thread = Some(thread::current().id());
        true
    }

    /// Leave `Running`; repeating tasks go back to `Scheduled`
    pub(crate) fn end_run(&self) {
        let mut status = self.status.lock();
        status.thread = None;
        if status.state == TaskState::Running {
            status.state = TaskState::Scheduled;
        }
    }

    /// Whether guest code for this task is executing on the calling thread
    pub(crate) fn runs_on_current_thread(&self) -> bool {
        self.status.lock().thread == Some(thread::current().id())
    }

    pub(crate) fn set_running_thread(&self, thread: Option<ThreadId>) {
        self.status.lock().thread = thread;
    }

    pub(crate) fn finish(&self) {
        let mut status = self.status.lock();
        status.state = TaskState::Finished;
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("script", &self.script_name)
            .field("kind", &self.kind)
            .field("interval", &self.interval)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Single-slot signal the worker blocks on while its callback is pending
#[derive(Default)]
pub(crate) struct Handoff {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Handoff {
    pub(crate) fn signal(&self) {
        *self.signalled.lock() = true;
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.cond.wait(&mut signalled);
        }
    }
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// The main-thread half of a sync-callback task
pub(crate) struct Callback {
    pub(crate) id: TaskId,
    pub(crate) outcome: GuestValue,
    phase: AtomicU8,
    pub(crate) handle: Mutex<Option<LoopHandle>>,
}

impl Callback {
    pub(crate) fn new(outcome: GuestValue) -> Self {
        Self {
            id: TaskId::next(),
            outcome,
            phase: AtomicU8::new(PENDING),
            handle: Mutex::new(None),
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.phase
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Claim the callback for execution
    pub(crate) fn begin(&self) -> bool {
        self.transition(PENDING, RUNNING)
    }

    pub(crate) fn complete(&self) {
        self.phase.store(DONE, Ordering::SeqCst);
    }

    /// Claim the callback for cancellation; fails once it has started
    pub(crate) fn try_cancel(&self) -> bool {
        self.transition(PENDING, CANCELLED)
    }
}
