// Integration tests for task scheduling and teardown

mod common;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, ThreadId};
use std::time::Duration;

use common::Harness;
use tickhost_scripting_api::{GuestError, GuestFn, GuestValue};
use tickhost_scripting_host::{
    CancelOutcome, LoggingConfig, ScriptApi, ScriptExceptionEvent, TaskError, TaskId, TaskState,
};

fn noop(name: &str) -> GuestFn {
    GuestFn::native(name, |_| Ok(GuestValue::None))
}

fn counting(name: &str) -> (Arc<AtomicUsize>, GuestFn) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    let function = GuestFn::native(name, move |_| {
        inner.fetch_add(1, Ordering::SeqCst);
        Ok(GuestValue::None)
    });
    (count, function)
}

fn collect_exceptions(harness: &Harness) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    harness
        .services()
        .exceptions
        .add_sink(move |event: &mut ScriptExceptionEvent| {
            sink.lock().push(event.message().to_string());
        });
    seen
}

#[test]
fn test_task_ids_strictly_increase() {
    let harness = Harness::new();
    let api = harness.empty_script("ids");

    let first = api.run_task(noop("a"), Vec::new()).unwrap();
    let second = api.run_task_async(noop("b"), Vec::new()).unwrap();
    let third = api.run_task_later(noop("c"), 3, Vec::new()).unwrap();

    assert!(first < second);
    assert!(second < third);
}

#[test]
fn test_sync_task_runs_on_next_tick() {
    let harness = Harness::new();
    let api = harness.empty_script("next-tick");
    let (count, function) = counting("tick");

    let id = api.run_task(function, vec![GuestValue::Int(1)]).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(harness.services().scheduler.task_state(id), Some(TaskState::Scheduled));

    harness.ticks(1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!harness.services().scheduler.is_active(id));
    assert!(api.script().resources().tasks.is_empty());
}

#[test]
fn test_delayed_task_waits_for_its_tick() {
    let harness = Harness::new();
    let api = harness.empty_script("later");
    let (count, function) = counting("later");

    api.run_task_later(function, 3, Vec::new()).unwrap();
    harness.ticks(2);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    harness.ticks(1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancel_sync_task_twice() {
    let harness = Harness::new();
    let api = harness.empty_script("cancel-sync");
    let (count, function) = counting("never");

    let id = api.run_task_later(function, 2, Vec::new()).unwrap();
    assert_eq!(api.cancel_task(id), CancelOutcome::Cancelled);
    assert_eq!(api.cancel_task(id), CancelOutcome::NotFound);

    harness.ticks(4);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(harness.main_loop.pending(), 0);
}

#[test]
fn test_cancel_running_async_task_twice() {
    let harness = Harness::new();
    let api = harness.empty_script("cancel-async");
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    let body = GuestFn::native("blocked", move |_| {
        let _ = release_rx.lock().recv_timeout(Duration::from_secs(2));
        Ok(GuestValue::None)
    });
    let id = api.run_task_async(body, Vec::new()).unwrap();
    harness.tick_until(|| harness.services().scheduler.task_state(id) == Some(TaskState::Running));

    assert_eq!(api.cancel_task(id), CancelOutcome::Cancelled);
    assert_eq!(api.cancel_task(id), CancelOutcome::AlreadyCancelled);

    release_tx.send(()).unwrap();
    harness.tick_until(|| !harness.services().scheduler.is_active(id));
    assert_eq!(api.cancel_task(id), CancelOutcome::NotFound);
}

#[test]
fn test_repeating_task() {
    let harness = Harness::new();
    let api = harness.empty_script("timer");
    let (count, function) = counting("every-other");

    let id = api.run_task_timer(function, 0, 2, Vec::new()).unwrap();
    harness.ticks(6);
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(harness.services().scheduler.is_active(id));

    assert_eq!(api.cancel_task(id), CancelOutcome::Cancelled);
    harness.ticks(4);
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn test_repeating_task_cancels_itself() {
    let harness = Harness::new();
    let api = harness.empty_script("self-cancel");
    let count = Arc::new(AtomicUsize::new(0));
    let own_id = Arc::new(Mutex::new(None));

    let inner_api = api.clone();
    let inner_count = count.clone();
    let inner_id = own_id.clone();
    let body = GuestFn::native("countdown", move |_| {
        if inner_count.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
            if let Some(id) = *inner_id.lock() {
                inner_api.cancel_task(id);
            }
        }
        Ok(GuestValue::None)
    });

    let id = api.run_task_timer(body, 1, 1, Vec::new()).unwrap();
    *own_id.lock() = Some(id);
    harness.ticks(6);

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(!harness.services().scheduler.is_active(id));
}

#[test]
fn test_negative_schedule_rejected() {
    let harness = Harness::new();
    let api = harness.empty_script("negative");

    let err = api.run_task_later(noop("f"), -1, Vec::new()).unwrap_err();
    assert_eq!(err, TaskError::InvalidSchedule { delay: -1, interval: 0 });

    let err = api.run_task_timer(noop("f"), 0, -5, Vec::new()).unwrap_err();
    assert_eq!(err, TaskError::InvalidSchedule { delay: 0, interval: -5 });

    let err = api.run_async(noop("f"), Vec::new(), -2).unwrap_err();
    assert!(matches!(err, TaskError::InvalidSchedule { .. }));
    assert_eq!(harness.services().scheduler.active_count(), 0);
}

#[test]
fn test_sync_callback_receives_outcome_on_main_thread() {
    let harness = Harness::new();
    let api = harness.empty_script("callback");
    let test_thread = thread::current().id();

    let body_thread: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
    let seen: Arc<Mutex<Option<(Vec<GuestValue>, ThreadId)>>> = Arc::new(Mutex::new(None));

    let recorded = body_thread.clone();
    let body = GuestFn::native("compute", move |args| {
        *recorded.lock() = Some(thread::current().id());
        let base = args.first().and_then(GuestValue::as_int).unwrap_or(0);
        Ok(GuestValue::Int(base * 2))
    });
    let recorded = seen.clone();
    let callback = GuestFn::native("report", move |args| {
        *recorded.lock() = Some((args.to_vec(), thread::current().id()));
        Ok(GuestValue::None)
    });

    let id = api
        .run_async_callback(body, vec![GuestValue::Int(21)], callback, 0)
        .unwrap();
    harness.tick_until(|| seen.lock().is_some());

    let (args, callback_thread) = seen.lock().clone().unwrap();
    assert_eq!(args, vec![GuestValue::Int(42)]);
    assert_eq!(callback_thread, test_thread);
    assert_ne!(body_thread.lock().unwrap(), test_thread);

    harness.tick_until(|| !harness.services().scheduler.is_active(id));
    assert!(api.script().resources().tasks.is_empty());
}

#[test]
fn test_none_outcome_calls_callback_without_arguments() {
    let harness = Harness::new();
    let api = harness.empty_script("no-outcome");
    let arg_count = Arc::new(Mutex::new(None));

    let recorded = arg_count.clone();
    let callback = GuestFn::native("done", move |args| {
        *recorded.lock() = Some(args.len());
        Ok(GuestValue::None)
    });
    api.run_sync_callback_task(noop("nothing"), callback, Vec::new())
        .unwrap();

    harness.tick_until(|| arg_count.lock().is_some());
    assert_eq!(*arg_count.lock(), Some(0));
}

#[test]
fn test_callback_error_still_finishes_task() {
    let harness = Harness::new();
    let exceptions = collect_exceptions(&harness);
    let api = harness.empty_script("callback-error");

    let callback = GuestFn::native("explode", |_| Err(GuestError::new("callback failed")));
    let id = api
        .run_sync_callback_task(noop("fine"), callback, Vec::new())
        .unwrap();

    harness.tick_until(|| !harness.services().scheduler.is_active(id));
    let exceptions = exceptions.lock();
    assert_eq!(exceptions.len(), 1);
    assert!(exceptions[0].starts_with("Error when executing task #"));
}

#[test]
fn test_async_error_skips_callback() {
    let harness = Harness::new();
    let exceptions = collect_exceptions(&harness);
    let api = harness.empty_script("body-error");
    let (callback_runs, callback) = counting("unreached");

    let body = GuestFn::native("fail", |_| Err(GuestError::new("no result").with_kind("IOError")));
    let id = api.run_sync_callback_task(body, callback, Vec::new()).unwrap();

    harness.tick_until(|| !harness.services().scheduler.is_active(id));
    harness.ticks(3);
    assert_eq!(callback_runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        exceptions.lock().clone(),
        vec![format!("Error when executing task {}", id)]
    );
}

#[test]
fn test_sync_task_error_is_reported() {
    let harness = Harness::new();
    let exceptions = collect_exceptions(&harness);
    let api = harness.empty_script("sync-error");

    let id = api
        .run_task(GuestFn::native("oops", |_| Err(GuestError::new("bad"))), Vec::new())
        .unwrap();
    harness.ticks(1);

    assert_eq!(
        exceptions.lock().clone(),
        vec![format!("Error when executing task {}", id)]
    );
    assert!(!harness.services().scheduler.is_active(id));
}

#[test]
fn test_unload_with_pending_callbacks_returns() {
    let harness = Harness::new();
    let api = harness.empty_script("pending");
    let (callback_runs, callback) = counting("late");

    let ids: Vec<_> = (0..4)
        .map(|i| {
            api.run_sync_callback_task(noop("quick"), callback.clone(), vec![GuestValue::Int(i)])
                .unwrap()
        })
        .collect();

    let scheduler = &harness.services().scheduler;
    for &id in &ids {
        while scheduler.task_state(id) != Some(TaskState::AwaitingCallback) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    harness.manager.unload("pending").unwrap();
    assert!(ids.iter().all(|&id| !scheduler.is_active(id)));

    harness.ticks(3);
    assert_eq!(callback_runs.load(Ordering::SeqCst), 0);
    assert_eq!(harness.main_loop.pending(), 0);
}

#[test]
fn test_unload_waits_for_running_async_body() {
    let harness = Harness::new();
    let api = harness.empty_script("slow");
    let finished = Arc::new(AtomicBool::new(false));

    let flag = finished.clone();
    let body = GuestFn::native("slow", move |_| {
        thread::sleep(Duration::from_millis(100));
        flag.store(true, Ordering::SeqCst);
        Ok(GuestValue::None)
    });
    let id = api.run_task_async(body, Vec::new()).unwrap();
    while harness.services().scheduler.task_state(id) != Some(TaskState::Running) {
        thread::sleep(Duration::from_millis(1));
    }

    harness.manager.unload("slow").unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(harness.services().scheduler.active_count(), 0);
}

#[test]
fn test_scheduling_after_unload_fails() {
    let harness = Harness::new();
    let api = harness.empty_script("gone");
    harness.manager.unload("gone").unwrap();

    let err = api.run_task(noop("late"), Vec::new()).unwrap_err();
    assert_eq!(err, TaskError::ScriptNotRunning("gone".to_string()));
    assert_eq!(harness.services().scheduler.active_count(), 0);
}

#[test]
fn test_worker_schedules_sync_task() {
    let harness = Harness::new();
    let api = harness.empty_script("chain");
    let (count, follow_up) = counting("follow-up");

    let inner_api = api.clone();
    let body = GuestFn::native("spawn-sync", move |_| {
        inner_api
            .run_task(follow_up.clone(), Vec::new())
            .map(|id| GuestValue::Int(id.get() as i64))
            .map_err(|e| GuestError::new(e.to_string()))
    });
    api.run_task_async(body, Vec::new()).unwrap();

    harness.tick_until(|| count.load(Ordering::SeqCst) == 1);
    harness.tick_until(|| harness.services().scheduler.active_count() == 0);
}

#[test]
fn test_delayed_async_cancelled_before_launch() {
    let harness = Harness::new();
    let api = harness.empty_script("never-launched");
    let (count, body) = counting("body");

    let id = api.run_async(body, Vec::new(), 5).unwrap();
    assert_eq!(harness.services().scheduler.task_state(id), Some(TaskState::Scheduled));
    assert_eq!(api.cancel_task(id), CancelOutcome::Cancelled);
    assert!(!harness.services().scheduler.is_active(id));

    harness.ticks(10);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

/// Async body that spins until its own task is cancelled
fn cooperative_loop(api: &ScriptApi, started: Arc<AtomicBool>) -> GuestFn {
    let api = api.clone();
    GuestFn::native("poll", move |_| {
        let Some(id) = api.current_task() else {
            return Err(GuestError::new("not running inside a task"));
        };
        started.store(true, Ordering::SeqCst);
        while !api.is_task_cancelled(id) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(GuestValue::None)
    })
}

#[test]
fn test_async_body_sees_cancel() {
    let harness = Harness::new();
    let api = harness.empty_script("poller");
    let started = Arc::new(AtomicBool::new(false));

    let id = api
        .run_task_async(cooperative_loop(&api, started.clone()), Vec::new())
        .unwrap();
    while !started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(!api.is_task_cancelled(id));

    assert_eq!(api.cancel_task(id), CancelOutcome::Cancelled);
    harness.tick_until(|| !harness.services().scheduler.is_active(id));
    assert!(api.is_task_cancelled(id));
}

#[test]
fn test_unload_stops_polling_async_body() {
    let harness = Harness::new();
    let api = harness.empty_script("poller");
    let started = Arc::new(AtomicBool::new(false));

    api.run_task_async(cooperative_loop(&api, started.clone()), Vec::new())
        .unwrap();
    while !started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }

    harness.manager.unload("poller").unwrap();
    assert_eq!(harness.services().scheduler.active_count(), 0);
}

#[test]
fn test_current_task_outside_tasks() {
    let harness = Harness::new();
    let api = harness.empty_script("idle");
    assert_eq!(api.current_task(), None);
    assert!(api.is_task_cancelled(TaskId::from_raw(u64::MAX)));
}

#[test]
fn test_bad_timestamp_format_does_not_block_unload() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::with_logging(LoggingConfig {
        log_to_file: true,
        min_log_level: "info".to_string(),
        log_timestamp_format: "%Q".to_string(),
        log_dir: Some(dir.path().to_path_buf()),
    });
    let api = harness.empty_script("odd-clock");

    let failing = GuestFn::native("fails", |_| Err(GuestError::new("worker failed")));
    let id = api.run_task_async(failing, Vec::new()).unwrap();
    harness.tick_until(|| !harness.services().scheduler.is_active(id));

    harness.manager.unload("odd-clock").unwrap();
    let log = std::fs::read_to_string(dir.path().join("odd-clock.log")).unwrap();
    assert!(log.contains(&format!("Error when executing task {}", id)));
}

#[test]
fn test_panicking_sink_does_not_strand_tasks() {
    let harness = Harness::new();
    let api = harness.empty_script("noisy");
    harness
        .services()
        .exceptions
        .add_sink(|_: &mut ScriptExceptionEvent| panic!("sink failure"));
    let reported = collect_exceptions(&harness);

    let failing = GuestFn::native("fails", |_| Err(GuestError::new("boom")));
    let worker = api.run_task_async(failing.clone(), Vec::new()).unwrap();
    let sync = api.run_task(failing, Vec::new()).unwrap();

    let scheduler = &harness.services().scheduler;
    harness.tick_until(|| !scheduler.is_active(worker) && !scheduler.is_active(sync));
    // later sinks still see the exception
    assert_eq!(reported.lock().len(), 2);

    harness.manager.unload("noisy").unwrap();
    assert_eq!(scheduler.active_count(), 0);
}

#[test]
fn test_timers_scheduled_during_unload_leave_no_entries() {
    let harness = Harness::new();
    let api = harness.empty_script("busy");
    let scheduled = Arc::new(AtomicUsize::new(0));

    let inner_api = api.clone();
    let count = scheduled.clone();
    let body = GuestFn::native("spam", move |_| {
        while inner_api
            .run_task_timer(noop("tick"), 1, 1, Vec::new())
            .is_ok()
        {
            count.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(50));
        }
        Ok(GuestValue::None)
    });
    api.run_task_async(body, Vec::new()).unwrap();
    while scheduled.load(Ordering::SeqCst) < 20 {
        thread::sleep(Duration::from_millis(1));
    }

    harness.manager.unload("busy").unwrap();
    harness.ticks(3);
    assert_eq!(harness.main_loop.pending(), 0);
    assert_eq!(harness.services().scheduler.active_count(), 0);
}

/// Schedule step `step` of a sync-callback chain; each callback schedules
/// the next step until `last`
fn chain_step(api: &ScriptApi, step: i64, last: i64, log: Arc<Mutex<Vec<String>>>) -> TaskId {
    let body_log = log.clone();
    let body = GuestFn::native(format!("body-{}", step), move |_| {
        body_log.lock().push(format!("body {}", step));
        Ok(GuestValue::Int(step))
    });

    let callback_api = api.clone();
    let callback = GuestFn::native(format!("callback-{}", step), move |args| {
        let value = args.first().and_then(GuestValue::as_int).unwrap_or(-1);
        let Some(own) = callback_api.current_task() else {
            return Err(GuestError::new("callback ran outside its task"));
        };
        // the worker stays parked, so the task is still active here
        let parked = !callback_api.is_task_cancelled(own);
        log.lock().push(format!("callback {} parked={}", value, parked));
        if step < last {
            chain_step(&callback_api, step + 1, last, log.clone());
        }
        Ok(GuestValue::None)
    });

    api.run_sync_callback_task(body, callback, Vec::new()).unwrap()
}

#[test]
fn test_chained_callbacks_run_in_order() {
    let harness = Harness::new();
    let api = harness.empty_script("chained");
    let log = Arc::new(Mutex::new(Vec::new()));
    let exceptions = collect_exceptions(&harness);

    let first = chain_step(&api, 1, 3, log.clone());

    let scheduler = &harness.services().scheduler;
    harness.tick_until(|| log.lock().len() == 6 && scheduler.active_count() == 0);
    assert!(!scheduler.is_active(first));
    assert_eq!(
        log.lock().clone(),
        vec![
            "body 1",
            "callback 1 parked=true",
            "body 2",
            "callback 2 parked=true",
            "body 3",
            "callback 3 parked=true",
        ]
    );
    assert!(exceptions.lock().is_empty());
}
