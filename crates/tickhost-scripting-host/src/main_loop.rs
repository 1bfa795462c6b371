//! Main-loop scheduling primitive
//!
//! Runnables are submitted from any thread and only ever executed inside
//! [`TickLoop::tick`], on the thread driving the loop.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::thread::{self, ThreadId};

use crate::context::panic_message;

/// Work executed on the main thread
pub type Runnable = Box<dyn FnMut() + Send + 'static>;

/// Handle for a scheduled main-loop entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopHandle(u64);

impl LoopHandle {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop#{}", self.0)
    }
}

pub trait MainLoop: Send + Sync + 'static {
    /// Run `runnable` on the main thread after `delay_ticks`, then every
    /// `interval_ticks` if that is nonzero
    fn schedule(&self, runnable: Runnable, delay_ticks: u64, interval_ticks: u64) -> LoopHandle;

    /// Remove an entry. Returns `true` only if it was removed before firing.
    fn cancel(&self, handle: LoopHandle) -> bool;

    /// Whether the calling thread is the one driving the loop
    fn is_main_thread(&self) -> bool;
}

struct Entry {
    key: (u64, u64),
    runnable: Runnable,
    interval: u64,
}

#[derive(Default)]
struct LoopState {
    current_tick: u64,
    next_order: u64,
    queue: BTreeMap<(u64, u64), LoopHandle>,
    entries: HashMap<LoopHandle, Entry>,
    running: Option<LoopHandle>,
    cancel_running: bool,
}

impl LoopState {
    fn enqueue(&mut self, handle: LoopHandle, due: u64, runnable: Runnable, interval: u64) {
        let key = (due, self.next_order);
        self.next_order += 1;
        self.queue.insert(key, handle);
        self.entries.insert(
            handle,
            Entry {
                key,
                runnable,
                interval,
            },
        );
    }
}

/// Tick-driven main loop, FIFO by (due tick, submission order)
#[derive(Default)]
pub struct TickLoop {
    state: Mutex<LoopState>,
    next_handle: AtomicU64,
    main_thread: OnceLock<ThreadId>,
}

impl TickLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed or in-progress ticks
    pub fn current_tick(&self) -> u64 {
        self.state.lock().current_tick
    }

    /// Number of entries waiting to fire
    pub fn pending(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Advance one tick and run every entry that is due, in order.
    ///
    /// The first thread to call this becomes the main thread. Returns how
    /// many runnables were executed.
    pub fn tick(&self) -> usize {
        let main = *self.main_thread.get_or_init(|| thread::current().id());
        if main != thread::current().id() {
            tracing::error!("tick() called off the main thread, ignoring");
            return 0;
        }

        let now = {
            let mut state = self.state.lock();
            state.current_tick += 1;
            state.current_tick
        };

        let mut ran = 0;
        loop {
            let (handle, mut entry) = {
                let mut state = self.state.lock();
                let Some((&key, &handle)) = state.queue.first_key_value() else {
                    break;
                };
                if key.0 > now {
                    break;
                }
                state.queue.remove(&key);
                let Some(entry) = state.entries.remove(&handle) else {
                    continue;
                };
                state.running = Some(handle);
                state.cancel_running = false;
                (handle, entry)
            };

            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (entry.runnable)())) {
                tracing::error!(
                    handle = %handle,
                    "main loop runnable panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
            ran += 1;

            let mut state = self.state.lock();
            state.running = None;
            let cancelled = std::mem::take(&mut state.cancel_running);
            if entry.interval > 0 && !cancelled {
                state.enqueue(handle, now + entry.interval, entry.runnable, entry.interval);
            }
        }
        ran
    }
}

impl MainLoop for TickLoop {
    fn schedule(&self, runnable: Runnable, delay_ticks: u64, interval_ticks: u64) -> LoopHandle {
        let handle = LoopHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        let due = state.current_tick + delay_ticks.max(1);
        state.enqueue(handle, due, runnable, interval_ticks);
        handle
    }

    fn cancel(&self, handle: LoopHandle) -> bool {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.remove(&handle) {
            state.queue.remove(&entry.key);
            return true;
        }
        if state.running == Some(handle) {
            state.cancel_running = true;
        }
        false
    }

    fn is_main_thread(&self) -> bool {
        self.main_thread.get() == Some(&thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, Runnable) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_one_shot_runs_on_next_tick() {
        let main_loop = TickLoop::new();
        let (count, runnable) = counter();
        main_loop.schedule(runnable, 0, 0);

        assert_eq!(main_loop.tick(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(main_loop.pending(), 0);

        assert_eq!(main_loop.tick(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_counts_ticks() {
        let main_loop = TickLoop::new();
        let (count, runnable) = counter();
        main_loop.schedule(runnable, 3, 0);

        main_loop.tick();
        main_loop.tick();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        main_loop.tick();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recurring_entry() {
        let main_loop = TickLoop::new();
        let (count, runnable) = counter();
        main_loop.schedule(runnable, 0, 2);

        for _ in 0..6 {
            main_loop.tick();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(main_loop.pending(), 1);
    }

    #[test]
    fn test_fifo_by_submission() {
        let main_loop = TickLoop::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            main_loop.schedule(Box::new(move || order.lock().push(i)), 1, 0);
        }
        main_loop.tick();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_cancel() {
        let main_loop = TickLoop::new();
        let (count, runnable) = counter();
        let handle = main_loop.schedule(runnable, 5, 0);

        assert!(main_loop.cancel(handle));
        assert!(!main_loop.cancel(handle));
        for _ in 0..6 {
            main_loop.tick();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_from_inside_stops_repeating() {
        let main_loop = Arc::new(TickLoop::new());
        let handle_slot: Arc<Mutex<Option<LoopHandle>>> = Arc::default();
        let count = Arc::new(AtomicUsize::new(0));

        let handle = {
            let main_loop_ref = Arc::clone(&main_loop);
            let slot = Arc::clone(&handle_slot);
            let count = Arc::clone(&count);
            main_loop.schedule(
                Box::new(move || {
                    if count.fetch_add(1, Ordering::SeqCst) == 1 {
                        if let Some(handle) = *slot.lock() {
                            assert!(!main_loop_ref.cancel(handle));
                        }
                    }
                }),
                0,
                1,
            )
        };
        *handle_slot.lock() = Some(handle);

        for _ in 0..5 {
            main_loop.tick();
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(main_loop.pending(), 0);
    }

    #[test]
    fn test_panicking_runnable_does_not_stop_tick() {
        let main_loop = TickLoop::new();
        main_loop.schedule(Box::new(|| panic!("boom")), 0, 0);
        let (count, runnable) = counter();
        main_loop.schedule(runnable, 0, 0);

        assert_eq!(main_loop.tick(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_main_thread_binding() {
        let main_loop = Arc::new(TickLoop::new());
        assert!(!main_loop.is_main_thread());
        main_loop.tick();
        assert!(main_loop.is_main_thread());

        let other = Arc::clone(&main_loop);
        let seen = std::thread::spawn(move || other.is_main_thread())
            .join()
            .unwrap();
        assert!(!seen);
    }
}
