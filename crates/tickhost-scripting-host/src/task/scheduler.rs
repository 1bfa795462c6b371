use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;

use tickhost_scripting_api::{GuestFn, GuestValue};

use super::{Callback, CancelOutcome, CurrentTask, Task, TaskId, TaskKind, TaskState};
use crate::context::ScriptContext;
use crate::error::TaskError;
use crate::exception::ExceptionRouter;
use crate::main_loop::{MainLoop, Runnable};

/// Owns every active task and runs them on the right thread
///
/// Sync tasks and callbacks run on the main loop. Async bodies get one
/// named worker thread each.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    main_loop: Arc<dyn MainLoop>,
    exceptions: ExceptionRouter,
    active: Mutex<HashMap<TaskId, Arc<Task>>>,
    drained: Condvar,
}

impl TaskScheduler {
    pub fn new(main_loop: Arc<dyn MainLoop>, exceptions: ExceptionRouter) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                main_loop,
                exceptions,
                active: Mutex::new(HashMap::new()),
                drained: Condvar::new(),
            }),
        }
    }

    pub fn main_loop(&self) -> &Arc<dyn MainLoop> {
        &self.inner.main_loop
    }

    /// Run `function` on the main thread after `delay` ticks, repeating
    /// every `interval` ticks when nonzero
    pub fn schedule_sync(
        &self,
        script: &Arc<ScriptContext>,
        function: GuestFn,
        args: Vec<GuestValue>,
        delay: i64,
        interval: i64,
    ) -> Result<TaskId, TaskError> {
        let (delay, interval) = validate(delay, interval)?;
        let task = Arc::new(Task::new(script, TaskKind::Sync, function, None, args, interval));
        self.register(script, &task)?;

        let runnable = self.runnable(&task, |scheduler, task| scheduler.run_sync(task));
        self.submit(&task, runnable, delay, interval);

        tracing::debug!(
            target: "scripting",
            script = script.name(),
            task = %task.id,
            delay,
            interval,
            "Scheduled sync task"
        );
        Ok(task.id)
    }

    /// Run `function` once on a worker thread after `delay` ticks
    pub fn schedule_async(
        &self,
        script: &Arc<ScriptContext>,
        function: GuestFn,
        args: Vec<GuestValue>,
        delay: i64,
    ) -> Result<TaskId, TaskError> {
        self.schedule_worker(script, TaskKind::Async, function, None, args, delay)
    }

    /// Run `function` on a worker thread, then hand its result to
    /// `callback` on the main thread. The worker stays parked until the
    /// callback has finished.
    pub fn schedule_async_with_callback(
        &self,
        script: &Arc<ScriptContext>,
        function: GuestFn,
        args: Vec<GuestValue>,
        callback: GuestFn,
        delay: i64,
    ) -> Result<TaskId, TaskError> {
        self.schedule_worker(
            script,
            TaskKind::SyncCallback,
            function,
            Some(callback),
            args,
            delay,
        )
    }

    fn schedule_worker(
        &self,
        script: &Arc<ScriptContext>,
        kind: TaskKind,
        function: GuestFn,
        callback_fn: Option<GuestFn>,
        args: Vec<GuestValue>,
        delay: i64,
    ) -> Result<TaskId, TaskError> {
        let (delay, _) = validate(delay, 0)?;
        let task = Arc::new(Task::new(script, kind, function, callback_fn, args, 0));
        self.register(script, &task)?;

        if delay == 0 {
            self.launch(&task)?;
        } else {
            let runnable = self.runnable(&task, |scheduler, task| {
                // failures are already logged and the task finished
                let _ = scheduler.launch(task);
            });
            self.submit(&task, runnable, delay, 0);
        }

        tracing::debug!(
            target: "scripting",
            script = script.name(),
            task = %task.id,
            kind = ?kind,
            delay,
            "Scheduled worker task"
        );
        Ok(task.id)
    }

    /// Cancel a task. Never fails; repeated calls are harmless.
    pub fn cancel_task(&self, id: TaskId) -> CancelOutcome {
        let Some(task) = self.inner.active.lock().get(&id).cloned() else {
            return CancelOutcome::NotFound;
        };
        if task.mark_cancelled() {
            return CancelOutcome::AlreadyCancelled;
        }

        match task.kind {
            TaskKind::Sync => {
                self.cancel_loop_entry(&task);
                self.task_finished(&task);
            }
            TaskKind::Async | TaskKind::SyncCallback => {
                // a worker that already started sees the flag and finishes itself
                if task.state() == TaskState::Scheduled && self.cancel_loop_entry(&task) {
                    self.task_finished(&task);
                }
                self.cancel_pending_callback(&task);
            }
        }

        tracing::debug!(
            target: "scripting",
            script = task.script_name.as_str(),
            task = %id,
            "Cancelled task"
        );
        CancelOutcome::Cancelled
    }

    /// Cancel everything `script` owns and wait until all of it is gone.
    ///
    /// Tasks scheduled while waiting are cancelled too. Guest code for the
    /// script that is running on the calling thread is not waited for.
    pub fn cancel_all_tasks(&self, script: &str) {
        loop {
            let owned: Vec<TaskId> = self
                .inner
                .active
                .lock()
                .values()
                .filter(|task| task.script_name == script && !task.runs_on_current_thread())
                .map(|task| task.id)
                .collect();
            if owned.is_empty() {
                return;
            }
            for id in owned {
                self.cancel_task(id);
            }

            let mut active = self.inner.active.lock();
            while active
                .values()
                .any(|task| task.script_name == script && !task.runs_on_current_thread())
            {
                self.inner.drained.wait(&mut active);
            }
        }
    }

    pub fn is_active(&self, id: TaskId) -> bool {
        self.inner.active.lock().contains_key(&id)
    }

    /// State of an active task; `None` once it has been removed
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        let task = self.inner.active.lock().get(&id).cloned();
        task.map(|task| task.state())
    }

    /// Whether `id` has been cancelled or is no longer active
    pub fn is_cancelled(&self, id: TaskId) -> bool {
        let task = self.inner.active.lock().get(&id).cloned();
        task.map_or(true, |task| task.is_cancelled())
    }

    /// The task whose guest code is running on the calling thread
    pub fn current_task() -> Option<TaskId> {
        super::current_task()
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Active task ids owned by `script`, oldest first
    pub fn tasks_for(&self, script: &str) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .inner
            .active
            .lock()
            .values()
            .filter(|task| task.script_name == script)
            .map(|task| task.id)
            .collect();
        ids.sort();
        ids
    }

    /// Remove a task from the registry. Only the first call has any effect.
    pub(crate) fn task_finished(&self, task: &Task) {
        if self.inner.active.lock().remove(&task.id).is_none() {
            return;
        }
        task.finish();
        if let Some(script) = task.script.upgrade() {
            script.with_resources(|resources| resources.tasks.remove(&task.id));
        }
        self.inner.drained.notify_all();
    }

    fn register(&self, script: &Arc<ScriptContext>, task: &Arc<Task>) -> Result<(), TaskError> {
        {
            // checked under the registry lock so cancel_all_tasks never misses a task
            let mut active = self.inner.active.lock();
            if !script.is_accepting() {
                return Err(TaskError::ScriptNotRunning(script.name().to_string()));
            }
            active.insert(task.id, Arc::clone(task));
        }
        script.with_resources(|resources| resources.tasks.insert(task.id));
        Ok(())
    }

    fn runnable<F>(&self, task: &Arc<Task>, run: F) -> Runnable
    where
        F: Fn(&TaskScheduler, &Arc<Task>) + Send + 'static,
    {
        let inner: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let task = Arc::clone(task);
        Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                run(&TaskScheduler { inner }, &task);
            }
        })
    }

    fn submit(&self, task: &Task, runnable: Runnable, delay: u64, interval: u64) {
        let handle = {
            let mut slot = task.loop_handle.lock();
            let handle = self.inner.main_loop.schedule(runnable, delay, interval);
            *slot = Some(handle);
            handle
        };
        // a cancel that ran before the handle was stored could not remove the entry
        if task.is_cancelled() && self.inner.main_loop.cancel(handle) {
            self.task_finished(task);
        }
    }

    fn cancel_loop_entry(&self, task: &Task) -> bool {
        match *task.loop_handle.lock() {
            Some(handle) => self.inner.main_loop.cancel(handle),
            None => false,
        }
    }

    fn cancel_pending_callback(&self, task: &Task) {
        let Some(callback) = task.callback.lock().clone() else {
            return;
        };
        if callback.try_cancel() {
            if let Some(handle) = callback.handle.lock().take() {
                self.inner.main_loop.cancel(handle);
            }
            task.handoff.signal();
        }
    }

    fn run_sync(&self, task: &Arc<Task>) {
        if !task.begin_run() {
            // queued before a cancel could see its handle; stop repeating
            self.cancel_loop_entry(task);
            return;
        }
        let _run = RunGuard {
            scheduler: self,
            task,
            finish: task.interval == 0,
        };
        let Some(script) = task.script.upgrade() else {
            self.task_finished(task);
            return;
        };

        let _current = CurrentTask::enter(task, false);
        if let Err(err) = script.invoke(&task.function, &task.args) {
            self.inner.exceptions.report(
                &script,
                &err,
                &format!("Error when executing task {}", task.id),
            );
        }
    }

    fn launch(&self, task: &Arc<Task>) -> Result<(), TaskError> {
        let inner = Arc::clone(&self.inner);
        let worker_task = Arc::clone(task);
        let spawned = thread::Builder::new()
            .name(format!("tickhost-task-{}", task.id.get()))
            .spawn(move || TaskScheduler { inner }.run_worker(&worker_task));

        if let Err(e) = spawned {
            tracing::error!(
                target: "scripting",
                script = task.script_name.as_str(),
                task = %task.id,
                "Failed to start worker thread: {}",
                e
            );
            self.task_finished(task);
            return Err(TaskError::Spawn(task.id, e.to_string()));
        }
        Ok(())
    }

    fn run_worker(&self, task: &Arc<Task>) {
        if !task.begin_run() {
            self.task_finished(task);
            return;
        }
        let _run = RunGuard {
            scheduler: self,
            task,
            finish: true,
        };
        let Some(script) = task.script.upgrade() else {
            return;
        };

        let result = {
            let _current = CurrentTask::enter(task, true);
            script.invoke(&task.function, &task.args)
        };
        match result {
            Ok(value) if task.kind == TaskKind::SyncCallback => self.hand_off(task, value),
            Ok(_) => {}
            Err(err) if task.is_cancelled() => {
                tracing::debug!(
                    target: "scripting",
                    script = task.script_name.as_str(),
                    task = %task.id,
                    "Task stopped after cancel: {}",
                    err
                );
            }
            Err(err) => {
                self.inner.exceptions.report(
                    &script,
                    &err,
                    &format!("Error when executing task {}", task.id),
                );
            }
        }
    }

    /// Publish the callback to the main loop and park until it has run or
    /// been cancelled
    fn hand_off(&self, task: &Arc<Task>, value: GuestValue) {
        let callback = Arc::new(Callback::new(value));
        task.set_state(TaskState::AwaitingCallback);
        *task.callback.lock() = Some(Arc::clone(&callback));

        // a cancel that ran before the callback was published could not see it
        if task.is_cancelled() && callback.try_cancel() {
            return;
        }

        let runnable = {
            let inner = Arc::downgrade(&self.inner);
            let task = Arc::clone(task);
            let callback = Arc::clone(&callback);
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    TaskScheduler { inner }.run_callback(&task, &callback);
                }
            })
        };
        {
            let mut slot = callback.handle.lock();
            *slot = Some(self.inner.main_loop.schedule(runnable, 0, 0));
        }

        task.handoff.wait();
    }

    fn run_callback(&self, task: &Arc<Task>, callback: &Callback) {
        if !callback.begin() {
            return;
        }
        let _signal = SignalOnDrop {
            task: task.as_ref(),
            callback,
        };
        task.set_running_thread(Some(thread::current().id()));
        let _current = CurrentTask::enter(task, false);

        let (Some(script), Some(function)) = (task.script.upgrade(), task.callback_fn.as_ref())
        else {
            return;
        };
        let args = if callback.outcome.is_none() {
            Vec::new()
        } else {
            vec![callback.outcome.clone()]
        };
        if let Err(err) = script.invoke(function, &args) {
            self.inner.exceptions.report(
                &script,
                &err,
                &format!("Error when executing task {}", callback.id),
            );
        }
    }
}

/// Leaves the running state, and removes one-shot tasks, however the run
/// ends
struct RunGuard<'a> {
    scheduler: &'a TaskScheduler,
    task: &'a Arc<Task>,
    finish: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.task.end_run();
        if self.finish {
            self.scheduler.task_finished(self.task);
        }
    }
}

/// Wakes the parked worker however the callback ends
struct SignalOnDrop<'a> {
    task: &'a Task,
    callback: &'a Callback,
}

impl Drop for SignalOnDrop<'_> {
    fn drop(&mut self) {
        self.task.set_running_thread(None);
        self.callback.complete();
        self.task.handoff.signal();
    }
}

fn validate(delay: i64, interval: i64) -> Result<(u64, u64), TaskError> {
    match (u64::try_from(delay), u64::try_from(interval)) {
        (Ok(delay), Ok(interval)) => Ok((delay, interval)),
        _ => Err(TaskError::InvalidSchedule { delay, interval }),
    }
}
